//! In-memory remote store for tests and simulation.

use crate::error::{SyncError, SyncResult};
use crate::remote::{AccountStatus, QueryOutcome, RecordQuery, RemoteStore};
use async_trait::async_trait;
use liftsync_model::{Record, RecordId, RecordType};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Kind of remote call recorded in the call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Fetch by key.
    Fetch,
    /// Save.
    Save,
    /// Delete.
    Delete,
    /// Query by type.
    Query,
}

/// A completed call, with logical start and finish sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    /// What kind of call.
    pub kind: CallKind,
    /// Record type touched.
    pub record_type: RecordType,
    /// Record address for keyed calls.
    pub id: Option<RecordId>,
    /// Sequence number taken when the call started.
    pub started: u64,
    /// Sequence number taken when the call finished.
    pub finished: u64,
    /// Whether the call succeeded.
    pub succeeded: bool,
}

#[derive(Default)]
struct Inner {
    records: HashMap<RecordId, Record>,
    log: Vec<RemoteCall>,
    next_seq: u64,
    latency: Duration,
    hanging: HashSet<String>,
    failing_types: HashMap<RecordType, String>,
    failing_keys: HashMap<String, String>,
    unsupported: HashSet<RecordType>,
    account: Option<AccountStatus>,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// A remote store held in memory.
///
/// Behaves like the real store (forward references rejected, owned
/// references cascade on delete) and adds knobs for fault injection:
/// latency, hanging keys, failing types and keys, unsupported queries.
#[derive(Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
}

impl MemoryRemoteStore {
    /// Creates an empty store reporting an available account.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds latency to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = latency;
    }

    /// Makes every call touching `key` hang forever.
    pub fn hang_key(&self, key: &str) {
        self.inner.lock().hanging.insert(key.to_string());
    }

    /// Stops hanging calls for `key`.
    pub fn release_key(&self, key: &str) {
        self.inner.lock().hanging.remove(key);
    }

    /// Makes every call on `record_type` fail with `reason`.
    pub fn fail_type(&self, record_type: RecordType, reason: &str) {
        self.inner
            .lock()
            .failing_types
            .insert(record_type, reason.to_string());
    }

    /// Makes every call touching `key` fail with `reason`.
    pub fn fail_key(&self, key: &str, reason: &str) {
        self.inner
            .lock()
            .failing_keys
            .insert(key.to_string(), reason.to_string());
    }

    /// Clears injected failures and hangs.
    pub fn clear_faults(&self) {
        let mut inner = self.inner.lock();
        inner.failing_types.clear();
        inner.failing_keys.clear();
        inner.hanging.clear();
    }

    /// Marks a record type as not queryable.
    pub fn set_unsupported(&self, record_type: RecordType) {
        self.inner.lock().unsupported.insert(record_type);
    }

    /// Sets the reported account status.
    pub fn set_account_status(&self, status: AccountStatus) {
        self.inner.lock().account = Some(status);
    }

    /// Seeds a record directly, bypassing reference checks and the call log.
    pub fn insert(&self, record: Record) {
        self.inner.lock().records.insert(record.id.clone(), record);
    }

    /// Returns a stored record.
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.inner.lock().records.get(id).cloned()
    }

    /// Returns every stored record of a type.
    pub fn records_of(&self, record_type: RecordType) -> Vec<Record> {
        let inner = self.inner.lock();
        let mut records: Vec<Record> = inner
            .records
            .values()
            .filter(|r| r.record_type() == record_type)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    /// Completed calls in finish order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().log.clone()
    }

    /// Completed save calls in finish order.
    pub fn saves(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind == CallKind::Save)
            .collect()
    }

    /// Clears the call log.
    pub fn clear_calls(&self) {
        self.inner.lock().log.clear();
    }

    /// Common prologue: takes a start sequence, waits out latency, honors hangs.
    async fn begin(&self, record_type: RecordType, key: Option<&str>) -> SyncResult<u64> {
        let (started, latency, hang, failure) = {
            let mut inner = self.inner.lock();
            let started = inner.tick();
            let hang = key.is_some_and(|k| inner.hanging.contains(k));
            let failure = key
                .and_then(|k| inner.failing_keys.get(k).cloned())
                .or_else(|| inner.failing_types.get(&record_type).cloned());
            (started, inner.latency, hang, failure)
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(reason) => Err(SyncError::SyncFailed(reason)),
            None => Ok(started),
        }
    }

    fn finish(
        &self,
        kind: CallKind,
        record_type: RecordType,
        id: Option<RecordId>,
        started: u64,
        succeeded: bool,
    ) {
        let mut inner = self.inner.lock();
        let finished = inner.tick();
        inner.log.push(RemoteCall {
            kind,
            record_type,
            id,
            started,
            finished,
            succeeded,
        });
    }

    fn log_failure(&self, kind: CallKind, record_type: RecordType, id: Option<RecordId>) {
        let started = self.inner.lock().tick();
        self.finish(kind, record_type, id, started, false);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        let started = match self.begin(id.record_type, Some(id.key.as_str())).await {
            Ok(started) => started,
            Err(e) => {
                self.log_failure(CallKind::Fetch, id.record_type, Some(id.clone()));
                return Err(e);
            }
        };
        let record = self.inner.lock().records.get(id).cloned();
        self.finish(CallKind::Fetch, id.record_type, Some(id.clone()), started, true);
        Ok(record)
    }

    async fn save(&self, record: Record) -> SyncResult<Record> {
        let id = record.id.clone();
        let started = match self.begin(id.record_type, Some(id.key.as_str())).await {
            Ok(started) => started,
            Err(e) => {
                self.log_failure(CallKind::Save, id.record_type, Some(id));
                return Err(e);
            }
        };

        let missing = {
            let mut inner = self.inner.lock();
            let missing = record
                .all_references()
                .find(|r| !inner.records.contains_key(&r.target))
                .map(|r| r.target.clone());
            if missing.is_none() {
                inner.records.insert(id.clone(), record.clone());
            }
            missing
        };

        match missing {
            Some(target) => {
                self.finish(CallKind::Save, id.record_type, Some(id.clone()), started, false);
                Err(SyncError::SyncFailed(format!(
                    "{id} references missing record {target}"
                )))
            }
            None => {
                self.finish(CallKind::Save, id.record_type, Some(id), started, true);
                Ok(record)
            }
        }
    }

    async fn delete(&self, id: &RecordId) -> SyncResult<()> {
        let started = match self.begin(id.record_type, Some(id.key.as_str())).await {
            Ok(started) => started,
            Err(e) => {
                self.log_failure(CallKind::Delete, id.record_type, Some(id.clone()));
                return Err(e);
            }
        };

        {
            let mut inner = self.inner.lock();
            let mut pending = vec![id.clone()];
            while let Some(next) = pending.pop() {
                if let Some(removed) = inner.records.remove(&next) {
                    pending.extend(
                        removed
                            .all_references()
                            .filter(|r| r.cascade_delete)
                            .map(|r| r.target.clone()),
                    );
                }
            }
        }

        self.finish(CallKind::Delete, id.record_type, Some(id.clone()), started, true);
        Ok(())
    }

    async fn query(&self, query: &RecordQuery) -> SyncResult<QueryOutcome> {
        let started = match self.begin(query.record_type, None).await {
            Ok(started) => started,
            Err(e) => {
                self.log_failure(CallKind::Query, query.record_type, None);
                return Err(e);
            }
        };

        let outcome = {
            let inner = self.inner.lock();
            if inner.unsupported.contains(&query.record_type) {
                QueryOutcome::Unsupported
            } else {
                let mut records: Vec<Record> = inner
                    .records
                    .values()
                    .filter(|r| query.matches(r))
                    .cloned()
                    .collect();
                records.sort_by(|a, b| a.id.cmp(&b.id));
                QueryOutcome::Records(records)
            }
        };

        self.finish(CallKind::Query, query.record_type, None, started, true);
        Ok(outcome)
    }

    async fn account_status(&self) -> SyncResult<AccountStatus> {
        Ok(self
            .inner
            .lock()
            .account
            .unwrap_or(AccountStatus::Available))
    }
}

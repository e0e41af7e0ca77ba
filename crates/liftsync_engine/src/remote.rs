//! Remote record store abstraction.

use crate::config::{DeadlineClass, TimeoutConfig};
use crate::error::SyncResult;
use crate::timeout::guard;
use async_trait::async_trait;
use liftsync_model::{FieldValue, Record, RecordId, RecordType};
use std::sync::Arc;
use tracing::debug;

/// Filter applied by a remote query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPredicate {
    /// Every record of the type.
    All,
    /// Records whose field equals the value.
    FieldEquals(String, FieldValue),
}

/// A query against one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    /// Type to query.
    pub record_type: RecordType,
    /// Filter.
    pub predicate: QueryPredicate,
}

impl RecordQuery {
    /// Queries every record of a type.
    pub fn all(record_type: RecordType) -> Self {
        Self {
            record_type,
            predicate: QueryPredicate::All,
        }
    }

    /// Queries records whose `field` equals `value`.
    pub fn field_equals(
        record_type: RecordType,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        Self {
            record_type,
            predicate: QueryPredicate::FieldEquals(field.into(), value.into()),
        }
    }

    /// Returns true if `record` satisfies this query.
    pub fn matches(&self, record: &Record) -> bool {
        if record.record_type() != self.record_type {
            return false;
        }
        match &self.predicate {
            QueryPredicate::All => true,
            QueryPredicate::FieldEquals(field, value) => record.get(field) == Some(value),
        }
    }
}

/// Result of a query.
///
/// "This type cannot be queried" is not a failure: pulls treat it as an
/// empty result. Real failures come back as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// Matching records; possibly empty.
    Records(Vec<Record>),
    /// The store does not support querying this type.
    Unsupported,
}

/// State of the remote account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    /// Account is signed in and usable.
    Available,
    /// No account is signed in.
    NoAccount,
    /// Account exists but is restricted (parental controls, MDM).
    Restricted,
    /// Status could not be determined right now.
    TemporarilyUnavailable,
}

impl AccountStatus {
    /// Returns true for errors that persist until the user acts.
    pub fn is_permanent_error(&self) -> bool {
        matches!(self, AccountStatus::NoAccount | AccountStatus::Restricted)
    }
}

/// A keyed record store.
///
/// `save` creates or overwrites by key; it must reject records whose
/// references point at keys the store does not hold.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads a record by address.
    async fn fetch(&self, id: &RecordId) -> SyncResult<Option<Record>>;

    /// Creates or overwrites a record.
    async fn save(&self, record: Record) -> SyncResult<Record>;

    /// Deletes a record, cascading along owned references.
    async fn delete(&self, id: &RecordId) -> SyncResult<()>;

    /// Runs a query.
    async fn query(&self, query: &RecordQuery) -> SyncResult<QueryOutcome>;

    /// Reports the account state.
    async fn account_status(&self) -> SyncResult<AccountStatus>;
}

/// The engine's only path to the remote store.
///
/// Every call goes through [`guard`] with the deadline for its class.
#[derive(Clone)]
pub struct GuardedRemote {
    store: Arc<dyn RemoteStore>,
    timeouts: TimeoutConfig,
}

impl GuardedRemote {
    /// Wraps a store.
    pub fn new(store: Arc<dyn RemoteStore>, timeouts: TimeoutConfig) -> Self {
        Self { store, timeouts }
    }

    /// Returns the deadline configuration.
    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    fn single_class(record_type: RecordType) -> DeadlineClass {
        match record_type {
            RecordType::UserProfile | RecordType::ProgressPhoto => DeadlineClass::AssetTransfer,
            _ => DeadlineClass::SingleRecord,
        }
    }

    fn bulk_class(record_type: RecordType) -> DeadlineClass {
        match record_type {
            RecordType::UserProfile | RecordType::ProgressPhoto => DeadlineClass::AssetTransfer,
            _ => DeadlineClass::Bulk,
        }
    }

    /// Guarded fetch.
    pub async fn fetch(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        let deadline = self.timeouts.deadline(Self::single_class(id.record_type));
        guard(&format!("fetch {id}"), deadline, self.store.fetch(id)).await
    }

    /// Guarded save.
    pub async fn save(&self, record: Record) -> SyncResult<Record> {
        let operation = format!("save {}", record.id);
        let deadline = self
            .timeouts
            .deadline(Self::single_class(record.record_type()));
        guard(&operation, deadline, self.store.save(record)).await
    }

    /// Guarded delete.
    pub async fn delete(&self, id: &RecordId) -> SyncResult<()> {
        let deadline = self.timeouts.deadline(DeadlineClass::SingleRecord);
        guard(&format!("delete {id}"), deadline, self.store.delete(id)).await
    }

    /// Guarded query.
    pub async fn query(&self, query: &RecordQuery) -> SyncResult<QueryOutcome> {
        let deadline = self.timeouts.deadline(Self::bulk_class(query.record_type));
        guard(
            &format!("query {}", query.record_type),
            deadline,
            self.store.query(query),
        )
        .await
    }

    /// Guarded account status check.
    pub async fn account_status(&self) -> SyncResult<AccountStatus> {
        let deadline = self.timeouts.deadline(DeadlineClass::StatusCheck);
        guard("account status", deadline, self.store.account_status()).await
    }

    /// Fetches every record matching `query`; unsupported queries yield nothing.
    pub async fn query_records(&self, query: &RecordQuery) -> SyncResult<Vec<Record>> {
        match self.query(query).await? {
            QueryOutcome::Records(records) => Ok(records),
            QueryOutcome::Unsupported => {
                debug!(record_type = %query.record_type, "query unsupported, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Fetches every record of a type.
    pub async fn fetch_all(&self, record_type: RecordType) -> SyncResult<Vec<Record>> {
        self.query_records(&RecordQuery::all(record_type)).await
    }

    /// Idempotent write: fetch by key, create if absent, apply fields, save.
    pub async fn upsert(&self, record: Record) -> SyncResult<Record> {
        let target = match self.fetch(&record.id).await? {
            Some(mut existing) => {
                existing.apply(&record);
                existing
            }
            None => record,
        };
        let saved = self.save(target).await?;
        debug!(record = %saved.id, "record upserted");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::memory::MemoryRemoteStore;
    use liftsync_model::EntityKey;
    use std::time::Duration;

    fn split_record(key: &str, name: &str) -> Record {
        Record::new(RecordId::new(RecordType::Split, key)).with("name", name)
    }

    fn guarded(store: &Arc<MemoryRemoteStore>) -> GuardedRemote {
        GuardedRemote::new(
            Arc::clone(store) as Arc<dyn RemoteStore>,
            TimeoutConfig::uniform(Duration::from_secs(1)),
        )
    }

    #[test]
    fn query_matching() {
        let record = Record::new(RecordId::new(RecordType::DayStorage, "h1"))
            .with("date", "10 March 2025");

        assert!(RecordQuery::all(RecordType::DayStorage).matches(&record));
        assert!(!RecordQuery::all(RecordType::Split).matches(&record));
        assert!(
            RecordQuery::field_equals(RecordType::DayStorage, "date", "10 March 2025")
                .matches(&record)
        );
        assert!(
            !RecordQuery::field_equals(RecordType::DayStorage, "date", "11 March 2025")
                .matches(&record)
        );
    }

    #[tokio::test]
    async fn upsert_creates_then_updates() {
        let store = Arc::new(MemoryRemoteStore::new());
        let remote = guarded(&store);

        remote
            .upsert(split_record("s1", "PPL").with("legacy", 1i64))
            .await
            .unwrap();
        remote.upsert(split_record("s1", "PPL v2")).await.unwrap();

        let stored = store
            .get(&RecordId::new(RecordType::Split, EntityKey::from("s1")))
            .unwrap();
        assert_eq!(stored.text("name").unwrap(), "PPL v2");
        assert_eq!(stored.integer("legacy").unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_query_is_empty() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.set_unsupported(RecordType::ProgressPhoto);
        let remote = guarded(&store);

        let records = remote.fetch_all(RecordType::ProgressPhoto).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn query_failure_propagates() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail_type(RecordType::WeightPoint, "zone not found");
        let remote = guarded(&store);

        let result = remote.fetch_all(RecordType::WeightPoint).await;
        assert!(matches!(result, Err(SyncError::SyncFailed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_save_times_out() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.hang_key("s1");
        let remote = guarded(&store);

        let result = remote.save(split_record("s1", "PPL")).await;
        assert!(matches!(result, Err(SyncError::Timeout { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn permanent_account_errors() {
        assert!(AccountStatus::NoAccount.is_permanent_error());
        assert!(AccountStatus::Restricted.is_permanent_error());
        assert!(!AccountStatus::TemporarilyUnavailable.is_permanent_error());
        assert!(!AccountStatus::Available.is_permanent_error());
    }
}

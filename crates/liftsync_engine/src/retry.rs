//! Bounded retry queue for transiently failed operations.
//!
//! The queue never schedules itself. A drain runs only when something
//! external asks for one: a network quality transition or an explicit flush.

use crate::error::SyncResult;
use crate::network::NetworkQuality;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A re-runnable operation held by the queue.
pub type RetryOperation = Arc<dyn Fn() -> BoxFuture<'static, SyncResult<()>> + Send + Sync>;

/// An operation waiting for another attempt.
pub struct RetryEntry {
    /// Queue-assigned identifier.
    pub id: u64,
    /// Human-readable description.
    pub description: String,
    operation: RetryOperation,
    /// Failed drain attempts so far.
    pub retry_count: u32,
    /// Attempts after which the entry is dropped.
    pub max_retries: u32,
    /// When the entry was enqueued.
    pub created_at: DateTime<Utc>,
}

/// Read-only view of a queued entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRetry {
    /// Queue-assigned identifier.
    pub id: u64,
    /// Human-readable description.
    pub description: String,
    /// Failed drain attempts so far.
    pub retry_count: u32,
}

/// Why a drain did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DrainSkip {
    /// Another drain is in progress.
    AlreadyDraining,
    /// Network quality does not permit automatic syncs.
    NetworkUnsuitable(NetworkQuality),
    /// Nothing is queued.
    Empty,
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Set when the drain was a no-op.
    pub skipped: Option<DrainSkip>,
    /// Entries invoked.
    pub attempted: usize,
    /// Entries that succeeded and were removed.
    pub succeeded: usize,
    /// Entries that failed and stay queued.
    pub requeued: usize,
    /// Descriptions of entries dropped after exhausting their retries.
    pub dropped: Vec<String>,
}

impl DrainReport {
    fn skipped(reason: DrainSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Resets the single-flight flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Queue of operations that failed transiently.
pub struct RetryQueue {
    entries: Mutex<Vec<RetryEntry>>,
    draining: AtomicBool,
    next_id: AtomicU64,
    passes: AtomicU64,
    max_retries: u32,
}

impl RetryQueue {
    /// Creates a queue whose entries are dropped after `max_retries` failed attempts.
    pub fn new(max_retries: u32) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            draining: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            passes: AtomicU64::new(0),
            max_retries: max_retries.max(1),
        }
    }

    /// Enqueues an operation. Returns its identifier.
    pub fn enqueue<F, Fut>(&self, description: impl Into<String>, operation: F) -> u64
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let description = description.into();
        debug!(id, %description, "retry enqueued");
        self.entries.lock().push(RetryEntry {
            id,
            description,
            operation: Arc::new(move || operation().boxed()),
            retry_count: 0,
            max_retries: self.max_retries,
            created_at: Utc::now(),
        });
        id
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns true while a drain is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Number of drain passes that actually ran.
    pub fn drain_passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Lists queued entries.
    pub fn pending(&self) -> Vec<PendingRetry> {
        self.entries
            .lock()
            .iter()
            .map(|e| PendingRetry {
                id: e.id,
                description: e.description.clone(),
                retry_count: e.retry_count,
            })
            .collect()
    }

    /// Runs every currently queued operation once.
    ///
    /// Successes are removed. Failures increment the entry's retry count and
    /// stay queued until the count reaches the maximum, then are dropped.
    /// Entries enqueued while the pass runs wait for the next drain.
    pub async fn drain(&self, quality: NetworkQuality) -> DrainReport {
        if !quality.should_auto_sync() {
            return DrainReport::skipped(DrainSkip::NetworkUnsuitable(quality));
        }
        if self.is_empty() {
            return DrainReport::skipped(DrainSkip::Empty);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain already in progress");
            return DrainReport::skipped(DrainSkip::AlreadyDraining);
        }
        let _guard = DrainGuard(&self.draining);
        self.passes.fetch_add(1, Ordering::SeqCst);

        let snapshot: Vec<(u64, RetryOperation)> = self
            .entries
            .lock()
            .iter()
            .map(|e| (e.id, Arc::clone(&e.operation)))
            .collect();

        let mut report = DrainReport::default();
        for (id, operation) in snapshot {
            report.attempted += 1;
            let result = operation().await;

            let mut entries = self.entries.lock();
            let Some(index) = entries.iter().position(|e| e.id == id) else {
                continue;
            };
            match result {
                Ok(()) => {
                    entries.remove(index);
                    report.succeeded += 1;
                }
                Err(e) => {
                    let entry = &mut entries[index];
                    entry.retry_count += 1;
                    if entry.retry_count >= entry.max_retries {
                        warn!(
                            id,
                            description = %entry.description,
                            attempts = entry.retry_count,
                            error = %e,
                            "retry exhausted, dropping"
                        );
                        let dropped = entries.remove(index);
                        report.dropped.push(dropped.description);
                    } else {
                        debug!(id, attempts = entry.retry_count, error = %e, "retry failed");
                        report.requeued += 1;
                    }
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            requeued = report.requeued,
            dropped = report.dropped.len(),
            "retry queue drained"
        );
        report
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

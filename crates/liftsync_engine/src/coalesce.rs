//! Write coalescing for small key-value settings.
//!
//! Writes land in a pending map. The first write after a flush arms a
//! single-shot timer; when it fires the whole map is written to the sink in
//! one batch and cleared. Later writes to the same key before the flush
//! replace the pending value. A failed timed flush keeps the batch and
//! re-arms the timer.

use crate::error::SyncResult;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Durable key-value storage behind the coalescer.
pub trait KeyValueSink: Send + Sync {
    /// Reads every stored value.
    fn read_all(&self) -> SyncResult<BTreeMap<String, Value>>;

    /// Writes a batch of values, replacing existing keys.
    fn write_batch(&self, batch: &BTreeMap<String, Value>) -> SyncResult<()>;
}

struct Shared {
    sink: Arc<dyn KeyValueSink>,
    pending: Mutex<BTreeMap<String, Value>>,
    armed: AtomicBool,
    flushes: AtomicU64,
    delay: Duration,
}

impl Shared {
    fn flush(&self) -> SyncResult<()> {
        self.armed.store(false, Ordering::SeqCst);
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return Ok(());
        }
        match self.sink.write_batch(&batch) {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::SeqCst);
                debug!(keys = batch.len(), "coalesced writes flushed");
                Ok(())
            }
            Err(e) => {
                // Keep values written since the batch was taken.
                let mut pending = self.pending.lock();
                for (key, value) in batch {
                    pending.entry(key).or_insert(value);
                }
                Err(e)
            }
        }
    }
}

/// Batches key-value writes behind one timer.
#[derive(Clone)]
pub struct WriteCoalescer {
    shared: Arc<Shared>,
}

impl WriteCoalescer {
    /// Creates a coalescer flushing to `sink` `delay` after the first pending write.
    pub fn new(sink: Arc<dyn KeyValueSink>, delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                sink,
                pending: Mutex::new(BTreeMap::new()),
                armed: AtomicBool::new(false),
                flushes: AtomicU64::new(0),
                delay,
            }),
        }
    }

    /// Queues a write.
    ///
    /// Outside a tokio runtime there is no timer to arm, so the write is
    /// flushed immediately.
    pub fn write(&self, key: impl Into<String>, value: Value) {
        self.shared.pending.lock().insert(key.into(), value);

        if self.shared.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    loop {
                        tokio::time::sleep(shared.delay).await;
                        let Err(e) = shared.flush() else {
                            break;
                        };
                        warn!(error = %e, "coalesced flush failed, retrying");
                        // A write since the failure has armed its own timer.
                        if shared.armed.swap(true, Ordering::SeqCst) {
                            break;
                        }
                    }
                });
            }
            Err(_) => {
                if let Err(e) = self.shared.flush() {
                    warn!(error = %e, "immediate flush failed");
                }
            }
        }
    }

    /// Flushes pending writes now.
    pub fn flush_now(&self) -> SyncResult<()> {
        self.shared.flush()
    }

    /// Number of writes waiting for the timer.
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Number of batches written to the sink.
    pub fn flush_count(&self) -> u64 {
        self.shared.flushes.load(Ordering::SeqCst)
    }
}

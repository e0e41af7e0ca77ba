//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Deadlines for guarded remote calls.
    pub timeouts: TimeoutConfig,
    /// Retry queue behavior.
    pub retry: RetryConfig,
    /// Delay before coalesced settings writes are flushed.
    pub settings_flush_delay: Duration,
    /// Capacity of the sync event channel.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            settings_flush_delay: Duration::from_millis(500),
            event_capacity: 64,
        }
    }

    /// Sets the timeout configuration.
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the settings flush delay.
    pub fn with_settings_flush_delay(mut self, delay: Duration) -> Self {
        self.settings_flush_delay = delay;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline class of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineClass {
    /// Fetch, save or delete of one record.
    SingleRecord,
    /// Query returning many records.
    Bulk,
    /// Account status check.
    StatusCheck,
    /// Record carrying a binary payload.
    AssetTransfer,
}

/// Per-call deadlines.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Single-record operations.
    pub single_record: Duration,
    /// Bulk queries.
    pub bulk: Duration,
    /// Account status checks.
    pub status_check: Duration,
    /// Binary asset uploads and downloads.
    pub asset_transfer: Duration,
}

impl TimeoutConfig {
    /// Uses one deadline for every class. Mostly useful in tests.
    pub fn uniform(deadline: Duration) -> Self {
        Self {
            single_record: deadline,
            bulk: deadline,
            status_check: deadline,
            asset_transfer: deadline,
        }
    }

    /// Sets the single-record deadline.
    pub fn with_single_record(mut self, deadline: Duration) -> Self {
        self.single_record = deadline;
        self
    }

    /// Sets the bulk query deadline.
    pub fn with_bulk(mut self, deadline: Duration) -> Self {
        self.bulk = deadline;
        self
    }

    /// Returns the deadline for a call class.
    pub fn deadline(&self, class: DeadlineClass) -> Duration {
        match class {
            DeadlineClass::SingleRecord => self.single_record,
            DeadlineClass::Bulk => self.bulk,
            DeadlineClass::StatusCheck => self.status_check,
            DeadlineClass::AssetTransfer => self.asset_transfer,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            single_record: Duration::from_secs(5),
            bulk: Duration::from_secs(15),
            status_check: Duration::from_secs(10),
            asset_transfer: Duration::from_secs(30),
        }
    }
}

/// Configuration for the retry queue.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after which a failing entry is dropped.
    pub max_retries: u32,
    /// Enqueue a retry automatically when a save times out.
    pub auto_enqueue: bool,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            auto_enqueue: true,
        }
    }

    /// Disables automatic enqueueing; retries then come only from the next full sync.
    pub fn manual_only(mut self) -> Self {
        self.auto_enqueue = false;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_deadlines() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(
            timeouts.deadline(DeadlineClass::SingleRecord),
            Duration::from_secs(5)
        );
        assert_eq!(timeouts.deadline(DeadlineClass::Bulk), Duration::from_secs(15));
        assert_eq!(
            timeouts.deadline(DeadlineClass::AssetTransfer),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn config_builder() {
        let config = SyncConfig::new()
            .with_timeouts(TimeoutConfig::uniform(Duration::from_millis(50)))
            .with_retry(RetryConfig::new(5).manual_only())
            .with_event_capacity(0);

        assert_eq!(config.timeouts.status_check, Duration::from_millis(50));
        assert_eq!(config.retry.max_retries, 5);
        assert!(!config.retry.auto_enqueue);
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn retry_config_floor() {
        assert_eq!(RetryConfig::new(0).max_retries, 1);
        assert_eq!(RetryConfig::default().max_retries, 3);
        assert!(RetryConfig::default().auto_enqueue);
    }
}

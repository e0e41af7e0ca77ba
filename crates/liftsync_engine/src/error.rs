//! Error types for the sync engine.

use crate::network::NetworkQuality;
use liftsync_model::ModelError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// Sync is disabled or the remote account cannot be used.
    #[error("sync not available: {0}")]
    NotAvailable(String),

    /// Payload is missing required fields or is malformed.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A remote call did not finish before its deadline.
    #[error("{operation} timed out after {deadline:?}")]
    Timeout {
        /// The guarded operation.
        operation: String,
        /// Deadline that was exceeded.
        deadline: Duration,
    },

    /// The remote store rejected a read or write.
    #[error("sync failed: {0}")]
    SyncFailed(String),

    /// Network quality does not permit an automatic sync right now.
    #[error("network quality too poor for automatic sync ({0})")]
    PoorNetworkQuality(NetworkQuality),

    /// A local collaborator (store, asset store, settings sink) failed.
    #[error("local storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Creates a timeout error for `operation`.
    pub fn timeout(operation: impl Into<String>, deadline: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            deadline,
        }
    }

    /// Returns true if this error is transient and may go to the retry queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Timeout { .. })
    }

    /// Short classification used in reports and logs.
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::Timeout { .. } => FailureKind::TimedOut,
            _ => FailureKind::Failed,
        }
    }
}

impl From<ModelError> for SyncError {
    fn from(err: ModelError) -> Self {
        SyncError::InvalidData(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage(err.to_string())
    }
}

/// How a failed remote operation is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FailureKind {
    /// Deadline exceeded; eligible for retry.
    TimedOut,
    /// Rejected or otherwise failed; not retried automatically.
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::timeout("save Day/d1", Duration::from_secs(5)).is_retryable());
        assert!(!SyncError::SyncFailed("quota exceeded".into()).is_retryable());
        assert!(!SyncError::NotAvailable("disabled".into()).is_retryable());
        assert!(!SyncError::InvalidData("missing name".into()).is_retryable());
        assert!(!SyncError::PoorNetworkQuality(NetworkQuality::Poor).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::timeout("fetch Split/s1", Duration::from_secs(5));
        assert_eq!(err.to_string(), "fetch Split/s1 timed out after 5s");

        let err = SyncError::PoorNetworkQuality(NetworkQuality::Offline);
        assert!(err.to_string().contains("offline"));
    }

    #[test]
    fn model_errors_are_invalid_data() {
        let err: SyncError =
            ModelError::missing(liftsync_model::RecordType::Split, "name").into();
        assert!(matches!(err, SyncError::InvalidData(_)));
        assert_eq!(err.kind(), FailureKind::Failed);
    }
}

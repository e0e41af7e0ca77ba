//! Deadline guard for remote calls.

use crate::error::{SyncError, SyncResult};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Races `call` against a timer of length `deadline`.
///
/// Whichever finishes first wins and the other is dropped. When the timer
/// wins the call fails with [`SyncError::Timeout`], which is retryable.
pub async fn guard<F, T>(operation: &str, deadline: Duration, call: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation, ?deadline, "remote call timed out");
            Err(SyncError::timeout(operation, deadline))
        }
    }
}

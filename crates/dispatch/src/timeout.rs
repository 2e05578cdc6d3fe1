//! Deadline guard for store calls
//!
//! Whichever finishes first wins: the operation or the deadline. On expiry
//! the operation future is dropped. Dropping stops the local side, but a
//! command already written to the store may still be applied, so callers
//! must tolerate a late side effect (TTLs bound how long it can linger).

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{DispatchError, Result};

/// Point operations: get, set, del, hash and marker writes
pub const POINT_DEADLINE: Duration = Duration::from_millis(200);
/// Spatial queries
pub const SEARCH_DEADLINE: Duration = Duration::from_millis(300);

/// Race `operation` against `deadline`.
///
/// # Errors
///
/// [`DispatchError::Timeout`] carrying `label` when the deadline wins. The
/// operation's own output is returned untouched otherwise.
pub async fn with_timeout<F, T>(operation: F, deadline: Duration, label: &str) -> Result<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(value) => Ok(value),
        Err(_) => {
            let deadline_ms = deadline.as_millis() as u64;
            warn!(label, deadline_ms, "Store call timed out");
            Err(DispatchError::Timeout {
                label: label.to_string(),
                deadline_ms,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test(start_paused = true)]
    async fn test_fast_operation_passes_through() {
        let value = with_timeout(async { 42 }, POINT_DEADLINE, "get").await;
        assert_eq!(value, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_becomes_timeout_with_label() {
        let result = with_timeout(
            std::future::pending::<()>(),
            SEARCH_DEADLINE,
            "geo-radius",
        )
        .await;

        assert_matches!(
            result,
            Err(DispatchError::Timeout { label, deadline_ms: 300 }) if label == "geo-radius"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_operation_is_dropped() {
        let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = flag.clone();

        let result = with_timeout(
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                seen.store(true, std::sync::atomic::Ordering::SeqCst);
            },
            POINT_DEADLINE,
            "set",
        )
        .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!flag.load(std::sync::atomic::Ordering::SeqCst));
    }
}

//! Bounded collaborator calls.

use std::future::Future;
use std::time::Duration;

use crate::domain::{Result, UpkeepError};

/// Await `fut` for at most `limit`.
///
/// An elapsed timer becomes [`UpkeepError::Timeout`]; the inner future is
/// dropped, which cancels it at its next await point.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(UpkeepError::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_limit() {
        let value = with_timeout("quick", Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_becomes_timeout_error() {
        let err = with_timeout("slow scan", Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, UpkeepError::Timeout { timeout_ms: 50, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let err = with_timeout::<(), _>("install", Duration::from_secs(1), async {
            Err(UpkeepError::TestFailure("2 failed".to_string()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, UpkeepError::TestFailure(_)));
    }
}

//! Deadline-bounded operations.
//!
//! The operation runs on its own task. When the deadline passes first the
//! caller stops waiting and gets [`StoreError::TimedOut`]; the task itself
//! keeps running to completion in the background.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;

use crate::error::StoreError;

/// Run `fut` on a spawned task, waiting at most `limit` for its output.
pub async fn run_bounded<F, T>(operation: &str, limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(fut);
    finish(operation, limit, timeout(limit, handle).await)
}

fn finish<T>(
    operation: &str,
    limit: Duration,
    outcome: Result<Result<T, tokio::task::JoinError>, tokio::time::error::Elapsed>,
) -> Result<T, StoreError> {
    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => Err(StoreError::TaskFailed(format!("{}: {}", operation, join_err))),
        Err(_) => {
            warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "Operation exceeded deadline; continuing without waiting"
            );
            Err(StoreError::TimedOut {
                operation: operation.to_string(),
                after: limit,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let value = run_bounded("quick", Duration::from_secs(1), async { 7 })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_cancel_work() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let err = run_bounded("slow", Duration::from_millis(50), async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StoreError::TimedOut { ref operation, .. } if operation == "slow"));
        assert!(!finished.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_panicking_task_reported() {
        let err = run_bounded("boom", Duration::from_secs(1), async {
            panic!("boom");
        })
        .await;
        assert!(matches!(err, Err(StoreError::TaskFailed(_))));
    }
}

//! Exponential-backoff retry for destination writes.
//!
//! Only write conflicts are retried. Any other error is returned on the
//! first attempt.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use docstore_storage::StoreError;
use docstore_types::MigrationSettings;
use tracing::{debug, error, warn};

use crate::error::MigrationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&MigrationSettings::default())
    }
}

impl From<&MigrationSettings> for RetryPolicy {
    fn from(settings: &MigrationSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_delay,
            initial_interval: self.base_delay,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: self.max_delay,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `op`, retrying write conflicts with doubling delays.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut backoff = self.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match op().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation, attempts, "Write succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_write_conflict() => {
                    if attempts > self.max_retries {
                        error!(operation, attempts, error = %e, "Max retries exceeded");
                        return Err(MigrationError::WriteConflict {
                            operation: operation.to_string(),
                            attempts,
                        });
                    }
                    match backoff.next_backoff() {
                        Some(delay) => {
                            warn!(
                                operation,
                                attempt = attempts,
                                retry_in_ms = delay.as_millis() as u64,
                                "Write conflict, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(operation, attempts, "Backoff exhausted");
                            return Err(MigrationError::WriteConflict {
                                operation: operation.to_string(),
                                attempts,
                            });
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_engine::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn conflict() -> StoreError {
        StoreError::Engine(EngineError::WriteConflict("busy".into()))
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let value = policy(5)
            .run("append", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(conflict())
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_limit() {
        let calls = AtomicU32::new(0);
        let err = policy(2)
            .run("append", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(conflict())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::WriteConflict { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let err = policy(5)
            .run("append", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::PoolClosed)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Store(StoreError::PoolClosed)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delays_double_and_cap() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        let mut backoff = policy.backoff();
        let delays: Vec<u64> = (0..4)
            .map(|_| backoff.next_backoff().unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 350, 350]);
    }
}

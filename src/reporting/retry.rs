use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use super::ReportingError;
use crate::config::BackendConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry_initial_backoff_ms),
            max_backoff: Duration::from_millis(config.retry_max_backoff_ms),
            multiplier: config.retry_multiplier.max(1.0),
        }
    }

    /// Single attempt, used where a caller must not block on delivery.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let secs = (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Runs `f` until it succeeds, is rejected, or the policy is spent.
/// Only [`ReportingError::Transient`] failures are retried.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut f: F,
) -> Result<T, ReportingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReportingError>>,
{
    let mut attempt = 1;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    log::debug!(
                        "'{}' succeeded on attempt {}/{}",
                        operation_name,
                        attempt,
                        policy.max_attempts
                    );
                }
                return Ok(result);
            }
            Err(ReportingError::Transient(reason)) if attempt >= policy.max_attempts => {
                log::error!(
                    "'{}' failed after {} attempts: {}",
                    operation_name,
                    attempt,
                    reason
                );
                return Err(ReportingError::Exhausted {
                    attempts: attempt,
                    last_error: reason,
                });
            }
            Err(ReportingError::Transient(reason)) => {
                let backoff = policy.backoff_for(attempt);
                log::warn!(
                    "'{}' failed on attempt {}/{}: {} (retrying in {:?})",
                    operation_name,
                    attempt,
                    policy.max_attempts,
                    reason,
                    backoff
                );
                sleep(backoff).await;
                attempt += 1;
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            multiplier: 2.0,
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(8), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast(3), "flaky", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ReportingError::Transient("503".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_counts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast(4), "down", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ReportingError::Transient("connection refused".to_string()))
        })
        .await;

        assert!(matches!(result, Err(ReportingError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_rejection_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast(5), "bad", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ReportingError::Rejected {
                status: 400,
                body: "bad".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(ReportingError::Rejected { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

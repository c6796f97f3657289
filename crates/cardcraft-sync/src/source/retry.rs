//! Exponential backoff for provider requests

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::SyncError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): base, 2x base, 4x base, ... capped
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    /// Every attempt failed with a transient error
    Exhausted { attempts: u32, last_error: SyncError },
    /// A non-transient error, or cancellation, ended the loop early
    Aborted { attempts: u32, error: SyncError },
}

impl<T> RetryOutcome<T> {
    /// Collapse into a `Result`, naming `url` in the exhaustion error
    pub fn into_result(self, url: &str) -> Result<T, SyncError> {
        match self {
            RetryOutcome::Succeeded { value, .. } => Ok(value),
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => Err(SyncError::RetriesExhausted {
                url: url.to_string(),
                attempts,
                last_error: last_error.to_string(),
            }),
            RetryOutcome::Aborted { error, .. } => Err(error),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or runs out of attempts
///
/// Sleeps between attempts are interrupted by `cancel`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return RetryOutcome::Aborted {
                attempts: attempt - 1,
                error: SyncError::Cancelled,
            };
        }

        let error = match op(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                }
            },
            Err(e) => e,
        };

        if !error.is_transient() {
            return RetryOutcome::Aborted {
                attempts: attempt,
                error,
            };
        }

        if attempt >= max_attempts {
            return RetryOutcome::Exhausted {
                attempts: attempt,
                last_error: error,
            };
        }

        let delay = policy.delay_after(attempt);
        warn!(
            request = label,
            attempt,
            max_attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %error,
            "Request failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return RetryOutcome::Aborted { attempts: attempt, error: SyncError::Cancelled };
            },
            _ = tokio::time::sleep(delay) => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> SyncError {
        SyncError::HttpStatus {
            url: "https://api.example.test".to_string(),
            status: 502,
            body: "bad gateway".to_string(),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(2));
        assert_eq!(policy.delay_after(2), Duration::from_secs(4));
        assert_eq!(policy.delay_after(3), Duration::from_secs(8));
        assert_eq!(policy.delay_after(4), Duration::from_secs(10));
        assert_eq!(policy.delay_after(60), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let outcome = retry_with_backoff(&RetryPolicy::default(), &CancellationToken::new(), "test", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(server_error())
                } else {
                    Ok("payload")
                }
            }
        })
        .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Succeeded {
                value: "payload",
                attempts: 3
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> =
            retry_with_backoff(&RetryPolicy::default(), &CancellationToken::new(), "test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(server_error()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = outcome.into_result("https://api.example.test").unwrap_err();
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> =
            retry_with_backoff(&RetryPolicy::default(), &CancellationToken::new(), "test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(SyncError::HttpStatus {
                        url: "u".to_string(),
                        status: 404,
                        body: String::new(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(outcome, RetryOutcome::Aborted { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_backoff_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let outcome: RetryOutcome<()> =
            retry_with_backoff(&RetryPolicy::default(), &cancel, "test", |_| {
                trigger.cancel();
                async { Err(server_error()) }
            })
            .await;

        match outcome {
            RetryOutcome::Aborted { error, .. } => assert!(matches!(error, SyncError::Cancelled)),
            other => panic!("expected abort, got {other:?}"),
        }
    }
}

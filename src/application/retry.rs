//! Bounded exponential backoff with a per-call timeout.

use crate::error::RemoteError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for idempotent calls (1 = no retries).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// The last error of a call together with the number of attempts made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub attempts: u32,
    pub error: RemoteError,
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} attempt(s))", self.error, self.attempts)
    }
}

impl RetryPolicy {
    /// A policy for hot paths: one attempt, same timeout.
    pub fn single_attempt(&self) -> Self {
        Self {
            max_attempts: 1,
            ..self.clone()
        }
    }

    /// `min(base * 2^attempt, max)`, with `attempt` counted from zero.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Writes that are not idempotent on their key get exactly one attempt.
    pub fn attempts_for(&self, idempotent: bool) -> u32 {
        if idempotent {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Each attempt is bounded by `call_timeout`.
    pub async fn run<F, Fut, T>(
        &self,
        operation: &str,
        idempotent: bool,
        mut f: F,
    ) -> Result<T, CallFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.attempts_for(idempotent);
        let mut attempt: u32 = 0;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(RemoteError::Timeout(self.call_timeout.as_millis() as u64)),
            };
            match result {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempt = attempt + 1, "Call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let attempts = attempt + 1;
                    if !error.is_retryable() {
                        return Err(CallFailure { attempts, error });
                    }
                    if attempts >= max_attempts {
                        warn!(operation, attempts, error = %error, "Retries exhausted");
                        return Err(CallFailure { attempts, error });
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        operation,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for(40), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_policy()
            .run("lookup", true, || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RemoteError::Unavailable("blip".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast_policy()
            .run("lookup", true, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Unavailable("down".to_string())) }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_idempotent_call_is_attempted_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast_policy()
            .run("create", false, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Unavailable("down".to_string())) }
            })
            .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), _> = fast_policy()
            .run("lookup", true, || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Rejected("bad request".to_string())) }
            })
            .await;

        assert!(matches!(
            result.unwrap_err().error,
            RemoteError::Rejected(_)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let policy = RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_millis(10),
            ..fast_policy()
        };
        let result: Result<(), _> = policy
            .run("slow", true, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.error, RemoteError::Timeout(10));
        assert_eq!(failure.attempts, 2);
    }
}

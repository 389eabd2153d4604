//! Retry coordinator — bounded retries with exponential backoff around
//! external calls (mail fetch, LLM generation, notification send).
//!
//! Backoff doubles from `base_delay` up to `max_delay`, with no jitter unless
//! configured. Each attempt runs under `attempt_timeout`; a timed-out attempt
//! counts as a retryable error. Non-retryable errors propagate immediately
//! without consuming retry budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::config::RetryConfig;

/// Implemented by error types the coordinator can wrap.
pub trait RetryableError {
    /// Transient errors (timeouts, rate limits, connection drops) return
    /// true; everything else propagates on the first occurrence.
    fn is_retryable(&self) -> bool;

    /// Construct the error representing an attempt that hit the per-attempt
    /// timeout.
    fn attempt_timeout(timeout: Duration) -> Self;
}

/// Failure result of `call_with_retry`.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error> {
    /// Retry budget exhausted. `attempts` is the total number of attempts
    /// made, including the first.
    #[error("{attempts} attempts exhausted, last error: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The operation failed with a non-retryable error.
    #[error(transparent)]
    Fatal(E),
}

impl<E: std::error::Error> RetryError<E> {
    /// The underlying error, regardless of how retrying ended.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last, .. } | Self::Fatal(last) => last,
        }
    }
}

/// Run `op` with bounded retries per `policy`.
///
/// `max_retries = 3` allows up to four attempts in total. The caller decides
/// whether an `Exhausted` result is fatal to the enclosing operation.
pub async fn call_with_retry<T, E, F, Fut>(
    name: &str,
    policy: &RetryConfig,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: RetryableError + std::error::Error,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retries = 0u32;

    loop {
        let err = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => E::attempt_timeout(policy.attempt_timeout),
        };

        if !err.is_retryable() {
            return Err(RetryError::Fatal(err));
        }

        if retries >= policy.max_retries {
            return Err(RetryError::Exhausted {
                attempts: retries + 1,
                last: err,
            });
        }

        let delay = backoff_delay(policy, retries);
        warn!(
            operation = name,
            attempt = retries + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retryable failure, backing off"
        );
        tokio::time::sleep(delay).await;
        retries += 1;
    }
}

/// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
fn backoff_delay(policy: &RetryConfig, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry);
    let delay = policy
        .base_delay
        .saturating_mul(factor)
        .min(policy.max_delay);

    if policy.jitter {
        // Up to +50% spread to de-synchronize callers.
        let extra = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 2);
        delay + Duration::from_millis(extra)
    } else {
        delay
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("permanent")]
        Permanent,
        #[error("timed out after {0:?}")]
        Timeout(Duration),
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, Self::Transient | Self::Timeout(_))
        }

        fn attempt_timeout(timeout: Duration) -> Self {
            Self::Timeout(timeout)
        }
    }

    fn policy(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);
        let start = tokio::time::Instant::now();

        let result = call_with_retry("test", &policy(3), move || {
            let calls = Arc::clone(&calls_in_op);
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two retries: 1s + 2s of backoff.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_propagates_without_consuming_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = Arc::clone(&calls);

        let result: Result<(), _> = call_with_retry("test", &policy(3), move || {
            let calls = Arc::clone(&calls_in_op);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Permanent)
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(TestError::Permanent))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries() {
        let result: Result<(), _> = call_with_retry("test", &policy(3), || async {
            Err(TestError::Transient)
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_time_out_and_exhaust() {
        let result: Result<(), _> = call_with_retry("test", &policy(3), || {
            std::future::pending::<Result<(), TestError>>()
        })
        .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(last, TestError::Timeout(_)));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped_at_max_delay() {
        let capped = RetryConfig {
            max_delay: Duration::from_secs(2),
            ..policy(3)
        };
        assert_eq!(backoff_delay(&capped, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&capped, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&capped, 5), Duration::from_secs(2));
    }
}

//! Retry with exponential backoff.
//!
//! Used inside handlers for transient failures (HTTP 429/5xx, rate
//! limits). Invisible to the engine: a handler either returns a value or
//! a final error.

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let delay = self.initial_interval.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_interval.as_secs_f64()))
    }
}

/// Run `attempt` until it succeeds, returns a non-retryable error, or the
/// policy is exhausted. Cancellation aborts between attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancelToken,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match attempt().await {
            Ok(value) => {
                if attempts > 1 {
                    tracing::info!(attempts, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempts < policy.max_attempts => {
                if cancel.is_cancelled() {
                    return Err(e);
                }
                let delay = policy.delay_for(attempts);
                tracing::warn!(
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "transient failure, retrying after delay"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn flaky(fail_times: u32) -> (Arc<AtomicU32>, impl FnMut() -> futures::future::BoxFuture<'static, Result<u32>>) {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();
        let f = move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < fail_times {
                    Err(EngineError::service("transient", true))
                } else {
                    Ok(n + 1)
                }
            }) as futures::future::BoxFuture<'static, Result<u32>>
        };
        (counter, f)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_interval: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_retries() {
        let (counter, f) = flaky(2);
        let out = retry_with_backoff(&fast_policy(), &CancelToken::new(), f)
            .await
            .unwrap();
        assert_eq!(out, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let (counter, f) = flaky(10);
        let err = retry_with_backoff(&fast_policy(), &CancelToken::new(), f)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let counter = Arc::new(AtomicU32::new(0));
        let calls = counter.clone();
        let result: Result<()> = retry_with_backoff(&fast_policy(), &CancelToken::new(), move || {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::service("fatal", false))
            }) as futures::future::BoxFuture<'static, Result<()>>
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_caps_at_max_interval() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_interval: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
    }
}

//! Bounded retry with exponential backoff for provider calls.
//!
//! Only *retryable* failures (network faults, 5xx, rate limits) are
//! re-attempted; a server-supplied `retry_after` overrides the computed
//! backoff delay for that attempt.

use std::future::Future;
use std::time::Duration;

use rtc_domain::config::RetryConfig;
use rtc_domain::error::Result;

/// Exponential backoff policy: `base * factor^attempt`, at most
/// `max_attempts` total calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(c.base_delay_ms),
            factor: c.factor,
            max_attempts: c.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before re-attempt number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let ms = self.base_delay.as_millis() as f64 * self.factor.powi(attempt as i32);
        Duration::from_millis(ms as u64)
    }

    /// Run `f`, re-attempting retryable failures until success or the
    /// attempt cap. Non-retryable errors surface immediately.
    pub async fn run<T, F, Fut>(&self, what: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = e.retry_after().unwrap_or_else(|| self.delay_for_attempt(attempt));
                    tracing::warn!(
                        call = what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retryable provider failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_domain::error::{Error, ProviderKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::Provider {
            kind: ProviderKind::Llm,
            message: "503".into(),
            retryable: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let out: Result<&str> = policy
            .run("llm.complete", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(out.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_attempt_cap() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 5,
            ..RetryPolicy::default()
        };
        let out: Result<()> = policy
            .run("llm.complete", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let out: Result<()> = policy
            .run("llm.complete", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(Error::Provider {
                        kind: ProviderKind::Llm,
                        message: "bad request".into(),
                        retryable: false,
                    })
                }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn honors_retry_after_over_backoff() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();
        let out: Result<&str> = policy
            .run("llm.complete", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::RateLimited {
                            message: "429".into(),
                            retry_after: Some(Duration::from_secs(7)),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert!(out.is_ok());
        // The paused clock advances exactly by the slept durations.
        assert_eq!(started.elapsed(), Duration::from_secs(7));
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
    }
}

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::SyncConfig;

/// Bounded retry with a fixed pause between attempts.
///
/// No jitter and no exponential growth: remote calls here are a handful of
/// contact batches, not a hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        debug_assert!(max_attempts > 0, "retry policy needs at least one attempt");
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.retry_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run `operation` until it succeeds or attempts run out. The last
    /// attempt's error is returned unchanged.
    pub async fn execute<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        op = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Remote call failed, retrying in {}ms",
                        self.backoff.as_millis()
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> = fast(3)
            .execute("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("fail {n}")) } else { Ok("done") }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast(3)
            .execute("always-down", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("fail {n}"))
            })
            .await;

        assert_eq!(result.unwrap_err(), "fail 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn first_success_makes_one_call() {
        let calls = AtomicU32::new(0);
        let result: Result<u8, String> = fast(5)
            .execute("healthy", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn defaults_match_sync_config() {
        let policy = RetryPolicy::from_config(&SyncConfig::default());
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(), Duration::from_secs(1));
    }
}

//! Bounded retry with exponential backoff and jitter for notification calls.

use std::future::Future;
use std::time::Duration;

use scrumbot_core::config::DispatchConfig;
use scrumbot_core::error::{Result, ScrumError};

/// Retry policy for outbound notification calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u8,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay_ms: config.initial_backoff_ms,
            max_delay_ms: config.max_backoff_ms.max(config.initial_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based): doubling from the
    /// initial delay, capped, with ±20% jitter.
    pub fn delay_for_attempt(&self, attempt: u8) -> Duration {
        let base_delay = self.initial_delay_ms.saturating_mul(1 << attempt.min(10));
        let capped_delay = base_delay.min(self.max_delay_ms);
        let jitter_factor = 0.8 + (rand::random::<f64>() * 0.4);
        Duration::from_millis((capped_delay as f64 * jitter_factor) as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u8 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) || attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    tracing::warn!(
                        "⚠️ {what} failed (attempt {}/{}): {e}; retrying in {:?}",
                        attempt + 1,
                        self.max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// A missing channel or bad configuration will not fix itself on retry.
pub fn is_retryable(err: &ScrumError) -> bool {
    !(err.is_config() || matches!(err, ScrumError::ChannelNotFound(_) | ScrumError::NotFound(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 3000,
        };
        let first = policy.delay_for_attempt(0).as_millis();
        assert!((800..=1200).contains(&first));
        let second = policy.delay_for_attempt(1).as_millis();
        assert!((1600..=2400).contains(&second));
        let capped = policy.delay_for_attempt(8).as_millis();
        assert!((2400..=3600).contains(&capped));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from(&DispatchConfig::default());
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_delay_ms, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = RetryPolicy::default()
            .run("post", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ScrumError::Notify("timeout".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = RetryPolicy::default()
            .run("post", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScrumError::Notify("503".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_channel_not_found_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = RetryPolicy::default()
            .run("post", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScrumError::ChannelNotFound("telegram:1".into()))
            })
            .await;
        assert!(matches!(result, Err(ScrumError::ChannelNotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

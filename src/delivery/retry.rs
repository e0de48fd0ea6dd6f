//! Bounded retry for best-effort remote calls

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::ApiResult;
use crate::config::RetryConfig;

/// Retry policy for work-item link and unlink calls
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    attempts: u32,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff_min: Duration, backoff_max: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff_min,
            backoff_max: backoff_max.max(backoff_min),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.attempts,
            Duration::from_millis(config.backoff_min_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn backoff(&self) -> Duration {
        let min = self.backoff_min.as_millis() as u64;
        let max = self.backoff_max.as_millis() as u64;
        if max <= min {
            return self.backoff_min;
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// Run `call` until it succeeds, returns a terminal error, or the
    /// attempts run out. Gives up with `None` in the last two cases.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Some(value),
                Err(e) if e.is_terminal() => {
                    debug!(error = %e, operation, "giving up on terminal response");
                    return None;
                }
                Err(e) if attempt >= self.attempts => {
                    warn!(
                        error = %e,
                        operation,
                        attempts = attempt,
                        "giving up after retries"
                    );
                    return None;
                }
                Err(e) => {
                    let delay = self.backoff();
                    warn!(
                        error = %e,
                        operation,
                        retry = attempt,
                        max_retries = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

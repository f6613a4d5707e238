//! Exponential backoff retry policy for chain calls.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::IndexerError;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first try.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay to wait after the `attempt`-th failure (1-based), or `None` once
    /// `max_attempts` have been used.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.config.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let delay = self
            .config
            .initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.config.max_backoff);
        Some(delay.min(self.config.max_backoff))
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// exhausts its attempts. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, IndexerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IndexerError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => match self.next_delay(attempt) {
                    Some(delay) => {
                        warn!(
                            op = label,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying chain call"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(
                            op = label,
                            attempts = attempt,
                            error = %e,
                            "chain call failed, retries exhausted"
                        );
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

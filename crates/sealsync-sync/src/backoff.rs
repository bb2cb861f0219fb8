//! Bounded retry with quadratic backoff
//!
//! The delay after attempt `n` (1-indexed) is `n² s + n × 500 ms`, capped.
//! Operations are never retried past their attempt cap; the last error is
//! handed back to the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default ceiling for a single backoff delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Attempt cap plus delay ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    max_delay: Duration,
}

impl RetryPolicy {
    /// A policy allowing `max_attempts` tries (at least one)
    #[must_use]
    pub fn new(max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_delay,
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after failed attempt `attempt`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = u64::from(attempt);
        let millis = attempt
            .saturating_mul(attempt)
            .saturating_mul(1000)
            .saturating_add(attempt.saturating_mul(500));
        Duration::from_millis(millis).min(self.max_delay)
    }

    /// Run `op` until it succeeds or the attempt cap is reached
    ///
    /// `op` receives the 1-indexed attempt number. A cancelled token stops
    /// the wait between attempts and returns the most recent error.
    pub async fn run<F, Fut, T, E>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= self.max_attempts => {
                    warn!(
                        operation,
                        attempts = attempt,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(err),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, DEFAULT_MAX_DELAY)
    }
}

//! Bounded exponential backoff for transient failures.

use crate::error::Result;
use std::time::Duration;

/// Retry policy for one unit of work.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Minimum 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1` (attempts are 1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op`, retrying transient errors with backoff.
    ///
    /// Non-transient errors are returned immediately. After the last attempt
    /// the final error is returned.
    pub fn run<T>(&self, operation: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(
                        op = operation,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    if attempt > 1 {
                        tracing::warn!(op = operation, attempts = attempt, error = %e, "giving up");
                    }
                    return Err(e);
                }
            }
        }
    }
}

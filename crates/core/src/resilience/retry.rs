//! Bounded retry with optional exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Returned when every attempt of a `RetryPolicy` failed.
///
/// Carries the number of attempts made and the error of the last one.
#[derive(Debug, thiserror::Error)]
#[error("operation failed after {attempts} attempt(s): {source}")]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    #[source]
    pub source: E,
}

/// Retry parameters. Pure configuration: the policy keeps no state between
/// calls to [`RetryPolicy::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Values below 1 are
    /// treated as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt, and the constant delay when
    /// `exponential` is off.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Double the delay after every failed attempt.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// Creates an exponential policy.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            exponential: true,
        }
    }

    /// Same policy with a constant `base_delay` between attempts.
    pub fn with_constant_delay(mut self) -> Self {
        self.exponential = false;
        self
    }

    /// Delay to wait before attempt number `attempt` (1-based).
    ///
    /// The first attempt never waits. Attempt `k >= 2` waits
    /// `min(base_delay * 2^(k-2), max_delay)` in exponential mode.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let delay = if self.exponential {
            let exponent = (attempt - 2).min(31);
            self.base_delay.saturating_mul(1u32 << exponent)
        } else {
            self.base_delay
        };
        delay.min(self.max_delay)
    }

    /// Runs `operation` until it succeeds or the attempt budget is spent.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= max_attempts => {
                    error!(attempts = attempt, error = %e, "Retry attempts exhausted");
                    return Err(RetryExhausted {
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_before(attempt + 1);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

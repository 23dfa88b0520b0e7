//! Bounded retry with doubling backoff.

use crate::error::DeliveryError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that tell the retry loop whether another attempt can help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for DeliveryError {
    fn is_transient(&self) -> bool {
        DeliveryError::is_transient(self)
    }
}

/// Retry policy: at most `max_attempts` calls, sleeping
/// `base_delay * 2^(n-1)` after the n-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// The last error is returned.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && e.is_transient() => {
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        operation = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

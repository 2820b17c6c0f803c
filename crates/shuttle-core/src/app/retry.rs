//! Retry policy: bounded exponential backoff on rate-limit signals.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::StoreError;

/// Errors that can tell whether they are an overload signal.
pub trait Retryable {
    fn is_rate_limited(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_rate_limited(&self) -> bool {
        StoreError::is_rate_limited(self)
    }
}

/// Retry policy for remote calls.
///
/// Only rate-limited failures are retried. Everything else (conflicts,
/// not-found, transport errors) is returned to the caller immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations, including the first.
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound of the uniform random delay added on top.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    /// 5 attempts, 2s base, x2, up to 1s jitter.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Calculate the backoff after a failed attempt, without jitter.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// Example with base_delay=2s, multiplier=2.0:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    /// - attempt 4: 16s
    /// - attempt 5: 32s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
    }

    fn jittered_delay(&self, attempts: u32) -> Duration {
        let jitter = self.jitter.mul_f64(rand::random::<f64>());
        self.next_delay(attempts).saturating_add(jitter)
    }

    /// Run `call` until it succeeds, fails with a non-rate-limit error, or
    /// `max_attempts` invocations have been made.
    ///
    /// Every rate-limited failure sleeps before the next step, the last one
    /// included; the last error is then returned.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limited() => err,
                Err(err) => return Err(err),
            };

            let delay = self.jittered_delay(attempt);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "rate limited, backing off"
            );
            tokio::time::sleep(delay).await;

            if attempt >= max_attempts {
                return Err(err);
            }
        }
    }
}

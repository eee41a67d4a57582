//! Retry with capped exponential backoff.
//!
//! Stateless: every call carries its own attempt counter, so one config can be
//! shared by any number of concurrent call sites.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use super::breaker::BreakerError;
use super::error::BackendError;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 10_000;
const DEFAULT_MULTIPLIER: f64 = 2.0;

pub(crate) const METRIC_RETRY_ATTEMPT: &str = "vetrina_retry_attempt_total";

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_retries: 1,
            ..Self::default()
        }
    }

    /// Wait after the failed `attempt` (1-based): `min(base * mult^(attempt-1), max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= capped {
            self.max_delay
        } else {
            Duration::from_millis(millis.max(0.0) as u64)
        }
    }
}

pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        BackendError::is_retryable(self)
    }
}

impl<E: Retryable> Retryable for BreakerError<E> {
    fn is_retryable(&self) -> bool {
        match self {
            BreakerError::Open => false,
            BreakerError::Inner(error) => error.is_retryable(),
        }
    }
}

/// The last error once retrying stopped, with the number of attempts made.
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
}

pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_retries.max(1);
    let mut attempt = 1;
    loop {
        counter!(METRIC_RETRY_ATTEMPT).increment(1);
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() {
                    debug!(attempt, error = %error, "Non-retryable failure");
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }
                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %error, "Retries exhausted");
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }
                let delay = config.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retryable failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

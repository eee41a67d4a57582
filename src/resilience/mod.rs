//! Resilience layer around outbound calls: error taxonomy, retry with capped
//! exponential backoff, and a shared circuit breaker.

mod breaker;
mod error;
mod retry;

pub use breaker::{BreakerConfig, BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState};
pub(crate) use breaker::{METRIC_BREAKER_OPEN, METRIC_BREAKER_REJECTED};
pub use error::{BackendError, ErrorClass, ErrorCode, GraphQlError, RequestError};
pub(crate) use retry::METRIC_RETRY_ATTEMPT;
pub use retry::{RetryConfig, RetryFailure, Retryable, with_retry};

//! Circuit breaker shared by every call through one executor.
//!
//! # State Machine
//!
//! ```text
//! Closed   --[failure_count >= threshold]------------> Open
//! Open     --[now - last_failure > timeout, one call]-> HalfOpen
//! HalfOpen --[trial succeeds]------------------------> Closed (count reset)
//! HalfOpen --[trial fails]---------------------------> Open (last_failure reset)
//! ```
//!
//! The breaker is per instance, not per query: one failing query type degrades
//! every other query routed through the same executor.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::util::lock::mutex_lock;

const SOURCE: &str = "resilience::breaker";

const DEFAULT_THRESHOLD: u32 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub(crate) const METRIC_BREAKER_OPEN: &str = "vetrina_breaker_open_total";
pub(crate) const METRIC_BREAKER_REJECTED: &str = "vetrina_breaker_rejected_total";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures that open the circuit.
    pub threshold: u32,
    /// Cool-down before a trial call is let through.
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker open")]
    Open,
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Time since the last recorded failure, if any.
    pub since_last_failure: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Runs `operation` unless the circuit rejects it.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire().ok_or(BreakerError::Open)?;
        match operation().await {
            Ok(value) => {
                permit.succeed();
                Ok(value)
            }
            Err(error) => {
                permit.fail();
                Err(BreakerError::Inner(error))
            }
        }
    }

    fn acquire(&self) -> Option<Permit<'_>> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "acquire");
        match inner.state {
            CircuitState::Closed => Some(Permit::new(self, false)),
            CircuitState::Open => {
                let now = Instant::now();
                let cooled = inner.last_failure.is_none_or(|at| {
                    now.saturating_duration_since(at) > self.config.timeout
                });
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(
                        failure_count = inner.failure_count,
                        "Circuit half-open, letting one trial call through"
                    );
                    Some(Permit::new(self, true))
                } else {
                    counter!(METRIC_BREAKER_REJECTED).increment(1);
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    counter!(METRIC_BREAKER_REJECTED).increment(1);
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Permit::new(self, true))
                }
            }
        }
    }

    fn record_success(&self, trial: bool) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_success");
        if trial {
            inner.trial_in_flight = false;
        }
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit closed after successful trial call");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
    }

    fn record_failure(&self, trial: bool) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "record_failure");
        if trial {
            inner.trial_in_flight = false;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let reopen = inner.state == CircuitState::HalfOpen;
        let trip =
            inner.state == CircuitState::Closed && inner.failure_count >= self.config.threshold;
        if reopen || trip {
            inner.state = CircuitState::Open;
            counter!(METRIC_BREAKER_OPEN).increment(1);
            warn!(
                failure_count = inner.failure_count,
                threshold = self.config.threshold,
                timeout_ms = self.config.timeout.as_millis() as u64,
                "Circuit opened"
            );
        }
    }

    fn release_trial(&self) {
        mutex_lock(&self.inner, SOURCE, "release_trial").trial_in_flight = false;
    }

    pub fn state(&self) -> CircuitState {
        mutex_lock(&self.inner, SOURCE, "state").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = mutex_lock(&self.inner, SOURCE, "snapshot");
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            since_last_failure: inner
                .last_failure
                .map(|at| Instant::now().saturating_duration_since(at)),
        }
    }

    /// Forces the circuit closed and clears the failure history.
    pub fn reset(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "reset");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &snapshot.state)
            .field("failure_count", &snapshot.failure_count)
            .finish()
    }
}

/// Admission for one call. Dropping it unsettled (the caller's future was
/// cancelled) frees the trial slot without changing state.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.trial);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.trial);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}

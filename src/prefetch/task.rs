use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::resilience::{ErrorCode, RequestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Hover,
    Idle,
    Scroll,
    Route,
    Manual,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Hover => "hover",
            Trigger::Idle => "idle",
            Trigger::Scroll => "scroll",
            Trigger::Route => "route",
            Trigger::Manual => "manual",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate evaluated when a trigger fires and again right before execution.
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
pub struct PrefetchStrategy {
    pub name: String,
    pub priority: Priority,
    pub trigger: Trigger,
    /// Wait between the trigger firing and the task becoming dispatchable.
    pub delay: Option<Duration>,
    pub condition: Option<Condition>,
}

impl PrefetchStrategy {
    pub fn new(name: impl Into<String>, priority: Priority, trigger: Trigger) -> Self {
        Self {
            name: name.into(),
            priority,
            trigger,
            delay: None,
            condition: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_condition(mut self, condition: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub(crate) fn condition_holds(&self) -> bool {
        self.condition.as_ref().is_none_or(|condition| condition())
    }
}

impl fmt::Debug for PrefetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchStrategy")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("trigger", &self.trigger)
            .field("delay", &self.delay)
            .field("has_condition", &self.condition.is_some())
            .finish()
    }
}

pub type FetchFuture<V> = BoxFuture<'static, Result<V, PrefetchError>>;
type FetchFn<V> = Box<dyn FnOnce() -> FetchFuture<V> + Send>;

/// A deferred fetch waiting for its trigger.
pub struct PrefetchTask<V> {
    pub strategy: PrefetchStrategy,
    pub cache_key: String,
    pub ttl: Option<Duration>,
    fetch: FetchFn<V>,
}

impl<V: Send + 'static> PrefetchTask<V> {
    pub fn new<F, Fut>(strategy: PrefetchStrategy, cache_key: impl Into<String>, fetch: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, PrefetchError>> + Send + 'static,
    {
        Self {
            strategy,
            cache_key: cache_key.into(),
            ttl: None,
            fetch: Box::new(move || fetch().boxed()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub(crate) fn into_fetch(self) -> FetchFn<V> {
        self.fetch
    }
}

impl<V> fmt::Debug for PrefetchTask<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchTask")
            .field("strategy", &self.strategy)
            .field("cache_key", &self.cache_key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "prefetch_{}", self.0.simple())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefetchError {
    #[error("[{code}] {message}")]
    Request { code: ErrorCode, message: String },
    #[error("prefetch fetch failed: {0}")]
    Fetch(String),
    #[error("prefetch task panicked")]
    Panicked,
}

impl PrefetchError {
    pub fn fetch(message: impl Into<String>) -> Self {
        Self::Fetch(message.into())
    }
}

impl From<RequestError> for PrefetchError {
    fn from(error: RequestError) -> Self {
        Self::Request {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchOutcome {
    Fetched,
    /// A live entry already existed; the fetch was skipped.
    AlreadyCached,
    /// The condition no longer held at execution time.
    ConditionNotMet,
    Failed(PrefetchError),
}

impl PrefetchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PrefetchOutcome::Fetched => "fetched",
            PrefetchOutcome::AlreadyCached => "already_cached",
            PrefetchOutcome::ConditionNotMet => "condition_not_met",
            PrefetchOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    /// Trigger fired; waiting for a free slot.
    Armed,
    Executing,
    Done(PrefetchOutcome),
    /// Dropped from a full queue before executing.
    Evicted,
    /// Removed by `cancel_prefetch` or `clear_queue`.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Done(_) | TaskState::Evicted | TaskState::Cancelled
        )
    }
}

//! Speculative prefetching driven by user signals.
//!
//! Callers queue [`PrefetchTask`]s tagged with a [`Trigger`]; hover, idle,
//! scroll, route and manual signals arm the matching tasks, and a bounded pool
//! executes them in priority order. Results go to the scheduler's own cache,
//! separate from the request executor's.

mod config;
mod queue;
mod routes;
mod scheduler;
mod task;

pub use config::PrefetchConfig;
pub use routes::{PredictedData, PredictionFetcher, RouteHistory, RoutePrediction, predict};
pub use scheduler::{PrefetchScheduler, PrefetchStats};
pub(crate) use scheduler::{
    METRIC_PREFETCH_EVICTED, METRIC_PREFETCH_EXECUTED, METRIC_PREFETCH_QUEUE_LEN,
};
pub use task::{
    Condition, FetchFuture, PrefetchError, PrefetchOutcome, PrefetchStrategy, PrefetchTask,
    Priority, TaskId, TaskState, Trigger,
};

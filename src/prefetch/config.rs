//! Prefetch scheduler configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Serialize;

const DEFAULT_MAX_CONCURRENT: usize = 3;
const DEFAULT_MAX_QUEUE_SIZE: usize = 15;
const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_IDLE_AFTER_MS: u64 = 2000;
const DEFAULT_HOVER_DELAY_MS: u64 = 200;
const DEFAULT_ROUTE_HISTORY_LEN: usize = 10;
const DEFAULT_CACHE_CAPACITY: usize = 500;
const DEFAULT_TASK_HISTORY_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrefetchConfig {
    /// Tasks executing at the same time.
    pub max_concurrent: usize,
    /// Queued (not yet executing) tasks.
    pub max_queue_size: usize,
    /// TTL for fetched data when the task sets none.
    pub default_ttl: Duration,
    /// Synthesize tasks from route heuristics on navigation.
    pub enable_predictive: bool,
    /// Fire the route trigger on navigation.
    pub enable_route_prefetch: bool,
    /// Quiet period after the last activity signal before the idle trigger fires.
    pub idle_after: Duration,
    /// Delay applied to hover-triggered tasks that set none.
    pub hover_delay: Duration,
    pub route_history_len: usize,
    /// Entries held by the scheduler's private cache.
    pub cache_capacity: usize,
    /// Finished tasks whose final state stays readable through `task_state`.
    pub task_history_len: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            enable_predictive: true,
            enable_route_prefetch: true,
            idle_after: Duration::from_millis(DEFAULT_IDLE_AFTER_MS),
            hover_delay: Duration::from_millis(DEFAULT_HOVER_DELAY_MS),
            route_history_len: DEFAULT_ROUTE_HISTORY_LEN,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            task_history_len: DEFAULT_TASK_HISTORY_LEN,
        }
    }
}

impl PrefetchConfig {
    pub(crate) fn effective_max_concurrent(&self) -> usize {
        self.max_concurrent.max(1)
    }

    pub(crate) fn effective_max_queue_size(&self) -> usize {
        self.max_queue_size.max(1)
    }

    pub(crate) fn effective_task_history_len(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.task_history_len).unwrap_or(NonZeroUsize::MIN)
    }
}

//! Trigger-driven prefetch scheduler.
//!
//! # Task lifecycle
//!
//! ```text
//! add_prefetch ──> Queued ──[trigger + condition]──> (delay) ──> Armed
//!                    │                                            │
//!                    ├──> Evicted (full queue)       [free slot]  v
//!                    └──> Cancelled (cancel/clear)            Executing ──> Done(outcome)
//! ```
//!
//! At most `max_concurrent` tasks execute at once; armed tasks wait their turn
//! in priority-then-FIFO order. Executing tasks always run to completion.
//! Outcomes land in the task state table and never reach the caller that
//! added the task.
//!
//! Every method that may arm or start work spawns on the ambient tokio runtime.

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::FutureExt;
use lru::LruCache;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::PrefetchConfig;
use super::queue::{Admission, PrefetchQueue, QueuedTask};
use super::routes::{PredictionFetcher, RouteHistory, predict};
use super::task::{
    PrefetchError, PrefetchOutcome, PrefetchStrategy, PrefetchTask, TaskId, TaskState, Trigger,
};
use crate::cache::{CacheConfig, ResponseCache};
use crate::timer::{OneShotTimer, TimerToken};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "prefetch::scheduler";
const CACHE_NAMESPACE: &str = "prefetch";

pub(crate) const METRIC_PREFETCH_EXECUTED: &str = "vetrina_prefetch_executed_total";
pub(crate) const METRIC_PREFETCH_EVICTED: &str = "vetrina_prefetch_evicted_total";
pub(crate) const METRIC_PREFETCH_QUEUE_LEN: &str = "vetrina_prefetch_queue_len";

#[derive(Debug, Clone, Serialize)]
pub struct PrefetchStats {
    pub queue_length: usize,
    pub active: usize,
    pub executed_count: usize,
    pub route_history: Vec<String>,
    pub route_visits: BTreeMap<String, u64>,
    pub cache_size: usize,
    /// Tasks whose state is still readable through `task_state`.
    pub tracked_tasks: usize,
    pub config: PrefetchConfig,
}

/// Task states. Pending tasks are bounded by the queue and the execution
/// slots; finished ones live in an LRU of `task_history_len` entries.
struct TaskStates {
    pending: HashMap<TaskId, TaskState>,
    finished: LruCache<TaskId, TaskState>,
}

impl TaskStates {
    fn new(config: &PrefetchConfig) -> Self {
        Self {
            pending: HashMap::new(),
            finished: LruCache::new(config.effective_task_history_len()),
        }
    }

    fn set(&mut self, id: TaskId, state: TaskState) {
        if state.is_terminal() {
            self.pending.remove(&id);
            self.finished.put(id, state);
        } else {
            self.pending.insert(id, state);
        }
    }

    fn get(&self, id: TaskId) -> Option<TaskState> {
        self.pending
            .get(&id)
            .or_else(|| self.finished.peek(&id))
            .cloned()
    }

    fn forget_finished(&mut self) {
        self.finished.clear();
    }

    fn len(&self) -> usize {
        self.pending.len() + self.finished.len()
    }
}

struct SchedulerState<V> {
    queue: PrefetchQueue<V>,
    /// Cache keys of executing tasks.
    in_flight: HashMap<TaskId, String>,
    /// Cache key to the task that executed it.
    executed: HashMap<String, TaskId>,
    states: TaskStates,
    history: RouteHistory,
}

impl<V> SchedulerState<V> {
    fn existing_task(&self, cache_key: &str) -> Option<TaskId> {
        if let Some(id) = self.executed.get(cache_key) {
            return Some(*id);
        }
        if let Some((id, _)) = self.in_flight.iter().find(|(_, key)| key.as_str() == cache_key) {
            return Some(*id);
        }
        self.queue.find_by_key(cache_key)
    }

    fn publish_queue_len(&self) {
        gauge!(METRIC_PREFETCH_QUEUE_LEN).set(self.queue.len() as f64);
    }
}

struct Shared<V> {
    config: PrefetchConfig,
    state: Mutex<SchedulerState<V>>,
    cache: ResponseCache<V>,
    fetcher: Option<Arc<dyn PredictionFetcher<V>>>,
    idle: Mutex<OneShotTimer>,
}

pub struct PrefetchScheduler<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for PrefetchScheduler<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> PrefetchScheduler<V> {
    pub fn new(config: PrefetchConfig) -> Self {
        Self::build(config, None)
    }

    /// A scheduler that synthesizes route predictions through `fetcher`.
    pub fn with_fetcher(config: PrefetchConfig, fetcher: Arc<dyn PredictionFetcher<V>>) -> Self {
        Self::build(config, Some(fetcher))
    }

    fn build(config: PrefetchConfig, fetcher: Option<Arc<dyn PredictionFetcher<V>>>) -> Self {
        let mut cache_config = CacheConfig::default().with_namespace(CACHE_NAMESPACE);
        cache_config.capacity = config.cache_capacity;
        let state = SchedulerState {
            queue: PrefetchQueue::new(config.effective_max_queue_size()),
            in_flight: HashMap::new(),
            executed: HashMap::new(),
            states: TaskStates::new(&config),
            history: RouteHistory::new(config.route_history_len),
        };
        Self {
            shared: Arc::new(Shared {
                cache: ResponseCache::new(&cache_config),
                config,
                state: Mutex::new(state),
                fetcher,
                idle: Mutex::new(OneShotTimer::new()),
            }),
        }
    }

    pub fn config(&self) -> &PrefetchConfig {
        &self.shared.config
    }

    /// Queues a task until its trigger fires.
    ///
    /// A task whose cache key is already queued, executing, or executed is not
    /// queued again; the id of the existing task is returned instead. When the
    /// queue is full and the task ranks below everything queued, the returned
    /// id is already `Evicted`.
    pub fn add_prefetch(&self, task: PrefetchTask<V>) -> TaskId {
        let mut state = mutex_lock(&self.shared.state, SOURCE, "add_prefetch");
        if let Some(existing) = state.existing_task(&task.cache_key) {
            debug!(
                task_id = %existing,
                cache_key = %task.cache_key,
                "Prefetch already known, skipping"
            );
            return existing;
        }

        let id = TaskId::new();
        let name = task.strategy.name.clone();
        let trigger = task.strategy.trigger;
        let admitted = match state.queue.push(id, task) {
            Admission::Admitted { evicted } => {
                state.states.set(id, TaskState::Queued);
                if let Some(victim) = evicted {
                    state.states.set(victim, TaskState::Evicted);
                    counter!(METRIC_PREFETCH_EVICTED).increment(1);
                    debug!(task_id = %victim, "Prefetch evicted from full queue");
                }
                debug!(task_id = %id, task = %name, %trigger, "Prefetch queued");
                true
            }
            Admission::Rejected => {
                state.states.set(id, TaskState::Evicted);
                counter!(METRIC_PREFETCH_EVICTED).increment(1);
                debug!(task_id = %id, task = %name, "Prefetch rejected by full queue");
                false
            }
        };
        state.publish_queue_len();
        drop(state);

        if admitted && trigger == Trigger::Idle {
            self.start_idle_countdown();
        }
        id
    }

    /// Arms the queued tasks waiting for `trigger` whose condition holds.
    pub fn trigger_prefetch(&self, trigger: Trigger) {
        fire(&self.shared, trigger);
    }

    /// Removes a queued task. Executing or finished tasks cannot be cancelled.
    pub fn cancel_prefetch(&self, id: TaskId) -> bool {
        let mut state = mutex_lock(&self.shared.state, SOURCE, "cancel_prefetch");
        if state.queue.remove(id).is_none() {
            return false;
        }
        state.states.set(id, TaskState::Cancelled);
        state.publish_queue_len();
        true
    }

    /// Cancels every queued task. Executing tasks are unaffected.
    pub fn clear_queue(&self) -> usize {
        let mut state = mutex_lock(&self.shared.state, SOURCE, "clear_queue");
        let drained = state.queue.drain();
        for id in &drained {
            state.states.set(*id, TaskState::Cancelled);
        }
        state.publish_queue_len();
        drained.len()
    }

    /// Forgets which cache keys already executed so they can be prefetched again.
    pub fn clear_executed(&self) {
        let mut state = mutex_lock(&self.shared.state, SOURCE, "clear_executed");
        state.executed.clear();
        state.states.forget_finished();
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        mutex_lock(&self.shared.state, SOURCE, "task_state")
            .states
            .get(id)
    }

    pub fn get_cached(&self, cache_key: &str) -> Option<V> {
        self.shared.cache.get(cache_key)
    }

    /// Records user activity and restarts the idle countdown.
    pub fn notify_activity(&self) {
        let weak = Arc::downgrade(&self.shared);
        mutex_lock(&self.shared.idle, SOURCE, "notify_activity")
            .schedule(self.shared.config.idle_after, move |token| on_idle(weak, token));
    }

    /// Starts the idle countdown unless one is already running, so idle tasks
    /// fire even when no activity is ever reported.
    fn start_idle_countdown(&self) {
        let mut idle = mutex_lock(&self.shared.idle, SOURCE, "start_idle_countdown");
        if idle.is_pending() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        idle.schedule(self.shared.config.idle_after, move |token| on_idle(weak, token));
    }

    /// Records a navigation, queues the predictions for `route`, and fires the
    /// route trigger. Returns the ids of the predicted tasks.
    pub fn on_route_change(&self, route: &str) -> Vec<TaskId> {
        mutex_lock(&self.shared.state, SOURCE, "on_route_change")
            .history
            .record(route);

        let mut predicted = Vec::new();
        if self.shared.config.enable_predictive
            && let Some(fetcher) = &self.shared.fetcher
        {
            for prediction in predict(route) {
                let strategy =
                    PrefetchStrategy::new(prediction.name, prediction.priority, Trigger::Route);
                let fetcher = Arc::clone(fetcher);
                let ttl = prediction.ttl;
                let key = prediction.cache_key;
                let task = PrefetchTask::new(strategy, key, move || fetcher.fetch(&prediction))
                    .with_ttl(ttl);
                predicted.push(self.add_prefetch(task));
            }
            debug!(route, predicted = predicted.len(), "Route predictions queued");
        }

        if self.shared.config.enable_route_prefetch {
            fire(&self.shared, Trigger::Route);
        }
        predicted
    }

    /// Periodically drops expired entries from the private cache. The sweeper
    /// stops on its own once the scheduler is dropped.
    pub fn start_cache_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let purged = shared.cache.purge_expired();
                if purged > 0 {
                    debug!(purged, "Swept expired prefetch entries");
                }
            }
        })
    }

    pub fn stats(&self) -> PrefetchStats {
        let state = mutex_lock(&self.shared.state, SOURCE, "stats");
        PrefetchStats {
            queue_length: state.queue.len(),
            active: state.in_flight.len(),
            executed_count: state.executed.len(),
            route_history: state.history.recent(),
            route_visits: state.history.visit_counts().into_iter().collect(),
            cache_size: self.shared.cache.len(),
            tracked_tasks: state.states.len(),
            config: self.shared.config.clone(),
        }
    }
}

async fn on_idle<V: Clone + Send + Sync + 'static>(shared: Weak<Shared<V>>, token: TimerToken) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    if !mutex_lock(&shared.idle, SOURCE, "on_idle").fire(token) {
        return;
    }
    debug!("User idle, firing idle prefetches");
    fire(&shared, Trigger::Idle);
}

fn fire<V: Clone + Send + Sync + 'static>(shared: &Arc<Shared<V>>, trigger: Trigger) {
    let candidates = mutex_lock(&shared.state, SOURCE, "fire").queue.candidates(trigger);
    let ready: Vec<_> = candidates
        .into_iter()
        .filter(|candidate| candidate.strategy.condition_holds())
        .map(|candidate| candidate.id)
        .collect();
    if ready.is_empty() {
        return;
    }

    let default_delay = (trigger == Trigger::Hover).then_some(shared.config.hover_delay);
    {
        let mut state = mutex_lock(&shared.state, SOURCE, "fire");
        for id in ready {
            match state.queue.begin_arming(id, default_delay) {
                Some(delay) => {
                    let weak = Arc::downgrade(shared);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(shared) = weak.upgrade() {
                            arm(&shared, id);
                            pump(&shared);
                        }
                    });
                }
                None => {
                    if state.queue.arm(id) {
                        state.states.set(id, TaskState::Armed);
                    }
                }
            }
        }
    }
    pump(shared);
}

fn arm<V>(shared: &Shared<V>, id: TaskId) {
    let mut state = mutex_lock(&shared.state, SOURCE, "arm");
    if state.queue.arm(id) {
        state.states.set(id, TaskState::Armed);
    }
}

/// Starts armed tasks while execution slots are free.
fn pump<V: Clone + Send + Sync + 'static>(shared: &Arc<Shared<V>>) {
    let launches = {
        let mut state = mutex_lock(&shared.state, SOURCE, "pump");
        let mut launches = Vec::new();
        while state.in_flight.len() < shared.config.effective_max_concurrent() {
            let Some(QueuedTask { id, task, .. }) = state.queue.pop_armed() else {
                break;
            };
            state.in_flight.insert(id, task.cache_key.clone());
            state.states.set(id, TaskState::Executing);
            launches.push((id, task));
        }
        if !launches.is_empty() {
            state.publish_queue_len();
        }
        launches
    };

    for (id, task) in launches {
        let slot = SlotGuard {
            shared: Arc::clone(shared),
            id,
            cache_key: task.cache_key.clone(),
            released: false,
        };
        tokio::spawn(execute(slot, task));
    }
}

async fn execute<V: Clone + Send + Sync + 'static>(slot: SlotGuard<V>, task: PrefetchTask<V>) {
    let name = task.strategy.name.clone();
    let ttl = task.ttl.unwrap_or(slot.shared.config.default_ttl);

    let outcome = if !task.strategy.condition_holds() {
        PrefetchOutcome::ConditionNotMet
    } else if slot.shared.cache.contains(&slot.cache_key) {
        PrefetchOutcome::AlreadyCached
    } else {
        let fetch = task.into_fetch();
        match AssertUnwindSafe(fetch()).catch_unwind().await {
            Ok(Ok(payload)) => {
                slot.shared.cache.set(slot.cache_key.clone(), payload, ttl);
                PrefetchOutcome::Fetched
            }
            Ok(Err(error)) => PrefetchOutcome::Failed(error),
            Err(_) => PrefetchOutcome::Failed(PrefetchError::Panicked),
        }
    };

    match &outcome {
        PrefetchOutcome::Failed(error) => warn!(
            task_id = %slot.id,
            task = %name,
            cache_key = %slot.cache_key,
            error = %error,
            "Prefetch failed"
        ),
        other => debug!(
            task_id = %slot.id,
            task = %name,
            outcome = other.label(),
            "Prefetch finished"
        ),
    }
    slot.complete(outcome);
}

/// Holds an execution slot. Dropping it without completing (the runtime shut
/// down mid-fetch) still frees the slot and marks the task cancelled.
struct SlotGuard<V> {
    shared: Arc<Shared<V>>,
    id: TaskId,
    cache_key: String,
    released: bool,
}

impl<V> SlotGuard<V> {
    fn release(&mut self, outcome: Option<PrefetchOutcome>) {
        self.released = true;
        let mut state = mutex_lock(&self.shared.state, SOURCE, "release");
        state.in_flight.remove(&self.id);
        match outcome {
            Some(outcome) => {
                if outcome != PrefetchOutcome::ConditionNotMet {
                    state.executed.insert(self.cache_key.clone(), self.id);
                }
                counter!(METRIC_PREFETCH_EXECUTED, "outcome" => outcome.label()).increment(1);
                state.states.set(self.id, TaskState::Done(outcome));
            }
            None => {
                state.states.set(self.id, TaskState::Cancelled);
            }
        }
    }
}

impl<V: Clone + Send + Sync + 'static> SlotGuard<V> {
    fn complete(mut self, outcome: PrefetchOutcome) {
        self.release(Some(outcome));
        pump(&self.shared);
    }
}

impl<V> Drop for SlotGuard<V> {
    fn drop(&mut self) {
        if !self.released {
            info!(task_id = %self.id, "Prefetch dropped while executing");
            self.release(None);
        }
    }
}

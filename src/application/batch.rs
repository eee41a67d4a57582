//! Time-windowed request batching.
//!
//! Requests admitted within `delay` of each other form one window; every
//! admission restarts the window. A window that reaches `max_size` is dispatched
//! at once. Dispatch runs every request of the window in parallel, and each
//! request resolves through its own channel, so one failure never touches its
//! siblings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use super::executor::{QueryResponse, RequestOptions};
use crate::resilience::RequestError;
use crate::timer::{OneShotTimer, TimerToken};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "application::batch";

const DEFAULT_DELAY_MS: u64 = 10;
const DEFAULT_MAX_SIZE: usize = 10;

pub(crate) const METRIC_BATCH_DISPATCH: &str = "vetrina_batch_dispatch_total";
pub(crate) const METRIC_BATCH_SIZE: &str = "vetrina_batch_size";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub delay: Duration,
    pub max_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchedRequest {
    pub id: Uuid,
    pub query: String,
    pub variables: Value,
    pub options: RequestOptions,
}

/// Executes one request of a dispatched window.
#[async_trait]
pub trait BatchHandler: Send + Sync + 'static {
    async fn handle(&self, request: BatchedRequest) -> Result<QueryResponse, RequestError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub queue_length: usize,
    pub dispatch_pending: bool,
    pub dispatches: u64,
}

type Reply = oneshot::Sender<Result<QueryResponse, RequestError>>;

struct PendingRequest {
    request: BatchedRequest,
    reply: Reply,
}

struct BatchState {
    pending: Vec<PendingRequest>,
    timer: OneShotTimer,
}

struct BatchShared<H> {
    config: BatchConfig,
    handler: Arc<H>,
    state: Mutex<BatchState>,
    dispatches: AtomicU64,
}

pub struct BatchCoordinator<H> {
    shared: Arc<BatchShared<H>>,
}

impl<H: BatchHandler> BatchCoordinator<H> {
    pub fn new(handler: Arc<H>, config: BatchConfig) -> Self {
        Self {
            shared: Arc::new(BatchShared {
                config,
                handler,
                state: Mutex::new(BatchState {
                    pending: Vec::new(),
                    timer: OneShotTimer::new(),
                }),
                dispatches: AtomicU64::new(0),
            }),
        }
    }

    /// Queues a request and waits for its own outcome.
    pub async fn enqueue(
        &self,
        query: String,
        variables: Value,
        options: RequestOptions,
    ) -> Result<QueryResponse, RequestError> {
        let (reply, receiver) = oneshot::channel();
        let request = BatchedRequest {
            id: Uuid::new_v4(),
            query,
            variables,
            options,
        };
        debug!(request_id = %request.id, "Request queued for batching");
        admit(&self.shared, PendingRequest { request, reply });
        receiver.await.unwrap_or(Err(RequestError::Cancelled))
    }

    /// Rejects every queued request with `Cancelled` and stops the window timer.
    pub fn cancel_pending(&self) -> usize {
        let drained = {
            let mut state = mutex_lock(&self.shared.state, SOURCE, "cancel_pending");
            state.timer.cancel();
            std::mem::take(&mut state.pending)
        };
        let cancelled = drained.len();
        for pending in drained {
            let _ = pending.reply.send(Err(RequestError::Cancelled));
        }
        cancelled
    }

    pub fn stats(&self) -> BatchStats {
        let state = mutex_lock(&self.shared.state, SOURCE, "stats");
        BatchStats {
            queue_length: state.pending.len(),
            dispatch_pending: state.timer.is_pending(),
            dispatches: self.shared.dispatches.load(Ordering::Relaxed),
        }
    }
}

fn admit<H: BatchHandler>(shared: &Arc<BatchShared<H>>, pending: PendingRequest) {
    let full = {
        let mut state = mutex_lock(&shared.state, SOURCE, "admit");
        state.pending.push(pending);
        if state.pending.len() >= shared.config.max_size {
            state.timer.cancel();
            Some(std::mem::take(&mut state.pending))
        } else {
            let weak = Arc::downgrade(shared);
            state
                .timer
                .schedule(shared.config.delay, move |token| on_window_elapsed(weak, token));
            None
        }
    };
    if let Some(batch) = full {
        dispatch(shared, batch, "size");
    }
}

async fn on_window_elapsed<H: BatchHandler>(shared: Weak<BatchShared<H>>, token: TimerToken) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let batch = {
        let mut state = mutex_lock(&shared.state, SOURCE, "on_window_elapsed");
        if !state.timer.fire(token) {
            return;
        }
        std::mem::take(&mut state.pending)
    };
    if !batch.is_empty() {
        dispatch(&shared, batch, "timer");
    }
}

fn dispatch<H: BatchHandler>(
    shared: &Arc<BatchShared<H>>,
    batch: Vec<PendingRequest>,
    reason: &'static str,
) {
    shared.dispatches.fetch_add(1, Ordering::Relaxed);
    counter!(METRIC_BATCH_DISPATCH, "reason" => reason).increment(1);
    histogram!(METRIC_BATCH_SIZE).record(batch.len() as f64);
    debug!(size = batch.len(), reason, "Dispatching batch");

    for PendingRequest { request, reply } in batch {
        let handler = Arc::clone(&shared.handler);
        tokio::spawn(async move {
            let outcome = handler.handle(request).await;
            let _ = reply.send(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;
    use crate::resilience::BackendError;

    struct EchoHandler {
        calls: AtomicUsize,
        work: Duration,
    }

    impl EchoHandler {
        fn new(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                work,
            })
        }
    }

    #[async_trait]
    impl BatchHandler for EchoHandler {
        async fn handle(&self, request: BatchedRequest) -> Result<QueryResponse, RequestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
            if request.variables["fail"] == json!(true) {
                return Err(RequestError::enhance(BackendError::graphql(["bad"]), 1));
            }
            Ok(QueryResponse {
                data: request.variables,
                from_cache: false,
                execution_time: self.work,
                cache_key: None,
            })
        }
    }

    fn coordinator(handler: Arc<EchoHandler>, max_size: usize) -> BatchCoordinator<EchoHandler> {
        BatchCoordinator::new(
            handler,
            BatchConfig {
                delay: Duration::from_millis(10),
                max_size,
            },
        )
    }

    fn enqueue(
        batcher: &BatchCoordinator<EchoHandler>,
        n: u32,
    ) -> impl std::future::Future<Output = Result<QueryResponse, RequestError>> + '_ {
        batcher.enqueue(
            "query { products { nodes { id } } }".to_string(),
            json!({ "n": n, "fail": n == 3 }),
            RequestOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn requests_in_one_window_share_a_dispatch() {
        let handler = EchoHandler::new(Duration::from_millis(50));
        let batcher = coordinator(handler.clone(), 10);

        let results =
            futures::future::join_all([1, 2, 4, 5, 6].map(|n| enqueue(&batcher, n))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(batcher.stats().dispatches, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn window_members_run_in_parallel() {
        let handler = EchoHandler::new(Duration::from_millis(100));
        let batcher = coordinator(handler, 10);
        let start = tokio::time::Instant::now();

        futures::future::join_all((1..=4).map(|n| enqueue(&batcher, n + 10))).await;

        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_isolated_to_its_own_request() {
        let handler = EchoHandler::new(Duration::from_millis(1));
        let batcher = coordinator(handler, 10);

        let results = futures::future::join_all((1..=5).map(|n| enqueue(&batcher, n))).await;

        for (index, result) in results.iter().enumerate() {
            if index == 2 {
                assert!(result.is_err());
            } else {
                let response = result.as_ref().unwrap();
                assert_eq!(response.data["n"], json!(index + 1));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn size_cap_dispatches_without_waiting() {
        let handler = EchoHandler::new(Duration::ZERO);
        let batcher = coordinator(handler, 3);

        let start = tokio::time::Instant::now();
        let results = futures::future::join_all((10..13).map(|n| enqueue(&batcher, n))).await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(batcher.stats().dispatches, 1);
        assert!(!batcher.stats().dispatch_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_starts_a_new_window() {
        let handler = EchoHandler::new(Duration::ZERO);
        let batcher = coordinator(handler.clone(), 3);

        let results = futures::future::join_all((10..14).map(|n| enqueue(&batcher, n))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(batcher.stats().dispatches, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_report_pending_window() {
        let handler = EchoHandler::new(Duration::ZERO);
        let batcher = Arc::new(coordinator(handler, 10));

        let task = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move { enqueue(&batcher, 1).await.is_ok() })
        };
        tokio::task::yield_now().await;

        let stats = batcher.stats();
        assert_eq!(stats.queue_length, 1);
        assert!(stats.dispatch_pending);

        assert!(task.await.unwrap());
        let stats = batcher.stats();
        assert_eq!(stats.queue_length, 0);
        assert!(!stats.dispatch_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_pending_rejects_queued_requests() {
        let handler = EchoHandler::new(Duration::ZERO);
        let batcher = Arc::new(coordinator(handler.clone(), 10));

        let task = {
            let batcher = Arc::clone(&batcher);
            tokio::spawn(async move { enqueue(&batcher, 1).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(batcher.cancel_pending(), 1);
        let outcome = task.await.unwrap();
        assert!(matches!(outcome, Err(RequestError::Cancelled)));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}

//! Request executor.
//!
//! Answers "give me the result of this query" as cheaply as possible: a live
//! cache entry wins; otherwise the backend is called through retry and the
//! shared circuit breaker, optionally coalesced by the batch coordinator, and
//! the result is cached under the TTL policy.
//!
//! A failed fetch never falls back to a cached value. A caller that wants a
//! fresh answer gets either fresh data or the error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use metrics::histogram;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::backend::QueryBackend;
use super::batch::{BatchConfig, BatchCoordinator, BatchHandler, BatchStats, BatchedRequest};
use crate::cache::{
    CacheConfig, CacheKey, CacheStats, KeySpec, QueryCategory, ResponseCache, TtlPolicy, TtlScope,
    category_patterns, product_patterns,
};
use crate::resilience::{
    BreakerConfig, BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState, RequestError,
    RetryConfig, with_retry,
};

pub(crate) const METRIC_REQUEST_MS: &str = "vetrina_request_ms";

const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_PROBE_QUERY: &str = "query HealthCheck { generalSettings { title } }";

/// Per-request behaviour switches.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub use_cache: bool,
    pub use_batching: bool,
    /// Skip the cache lookup but still store the fresh result.
    pub force_refresh: bool,
    /// Overrides the TTL policy when non-zero.
    pub cache_ttl: Option<Duration>,
    /// Overrides category detection.
    pub category: Option<QueryCategory>,
    /// Key context, e.g. `slug=blue-mug`.
    pub context: Option<String>,
    pub user_id: Option<String>,
    pub static_data: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            use_batching: false,
            force_refresh: false,
            cache_ttl: None,
            category: None,
            context: None,
            user_id: None,
            static_data: false,
        }
    }
}

impl RequestOptions {
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn batched(mut self) -> Self {
        self.use_batching = true;
        self
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_category(mut self, category: QueryCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn static_data(mut self) -> Self {
        self.static_data = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse<T = Value> {
    pub data: T,
    pub from_cache: bool,
    pub execution_time: Duration,
    /// Absent when the cache was bypassed.
    pub cache_key: Option<String>,
}

impl<T> QueryResponse<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryResponse<U> {
        QueryResponse {
            data: f(self.data),
            from_cache: self.from_cache,
            execution_time: self.execution_time,
            cache_key: self.cache_key,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<QueryResponse<U>, E> {
        Ok(QueryResponse {
            data: f(self.data)?,
            from_cache: self.from_cache,
            execution_time: self.execution_time,
            cache_key: self.cache_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    pub probe_query: String,
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_query: DEFAULT_PROBE_QUERY.to_string(),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub batch: BatchConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub query: String,
    pub variables: Value,
    pub options: RequestOptions,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, query: impl Into<String>, variables: Value) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            variables,
            options: RequestOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct BatchItemResult {
    pub id: String,
    pub outcome: Result<QueryResponse, RequestError>,
}

#[derive(Debug)]
pub struct BatchReport {
    pub results: Vec<BatchItemResult>,
    pub total_execution_time: Duration,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// Backend reachable, cache store unavailable.
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub cache: bool,
    pub backend: bool,
    pub backend_latency: Option<Duration>,
    pub backend_error: Option<String>,
    pub breaker: CircuitState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutorStats {
    pub cache: CacheStats,
    pub batch: BatchStats,
    pub breaker: BreakerSnapshot,
}

/// Cache, resilience and backend, shared with the batch coordinator.
pub(crate) struct ExecutorCore {
    backend: Arc<dyn QueryBackend>,
    cache: ResponseCache<Value>,
    cache_config: CacheConfig,
    ttl: TtlPolicy,
    retry: RetryConfig,
    breaker: CircuitBreaker,
}

impl ExecutorCore {
    fn key_for(&self, query: &str, variables: &Value, options: &RequestOptions) -> CacheKey {
        CacheKey::build(
            &self.cache_config,
            &KeySpec {
                query,
                variables,
                category: options.category,
                context: options.context.as_deref(),
                user: options.user_id.as_deref(),
            },
        )
    }

    fn ttl_for(&self, key: &CacheKey, options: &RequestOptions) -> Duration {
        options
            .cache_ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or_else(|| {
                self.ttl.ttl(
                    key.category(),
                    TtlScope {
                        user_scoped: options.user_id.is_some(),
                        static_data: options.static_data,
                    },
                )
            })
    }

    /// Backend call through retry, with every attempt passing the breaker.
    async fn fetch(&self, query: &str, variables: &Value) -> Result<Value, RequestError> {
        let backend = &self.backend;
        with_retry(&self.retry, || {
            self.breaker
                .call(|| backend.execute(query, variables))
        })
        .await
        .map_err(|failure| match failure.error {
            BreakerError::Open => RequestError::CircuitOpen,
            BreakerError::Inner(source) => RequestError::enhance(source, failure.attempts),
        })
    }

    async fn fetch_and_store(
        &self,
        query: &str,
        variables: &Value,
        options: &RequestOptions,
    ) -> Result<QueryResponse, RequestError> {
        let started = Instant::now();
        let key = self.key_for(query, variables, options);
        let data = self.fetch(query, variables).await?;
        let ttl = self.ttl_for(&key, options);
        self.cache.set(key.as_str(), data.clone(), ttl);
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached fresh response");
        Ok(QueryResponse {
            data,
            from_cache: false,
            execution_time: started.elapsed(),
            cache_key: Some(key.to_string()),
        })
    }
}

#[async_trait]
impl BatchHandler for ExecutorCore {
    async fn handle(&self, request: BatchedRequest) -> Result<QueryResponse, RequestError> {
        self.fetch_and_store(&request.query, &request.variables, &request.options)
            .await
    }
}

pub struct RequestExecutor {
    core: Arc<ExecutorCore>,
    batcher: BatchCoordinator<ExecutorCore>,
    health: HealthConfig,
}

impl RequestExecutor {
    pub fn new(backend: Arc<dyn QueryBackend>, config: ExecutorConfig) -> Self {
        let core = Arc::new(ExecutorCore {
            backend,
            cache: ResponseCache::new(&config.cache),
            ttl: TtlPolicy::new(config.cache.clone()),
            cache_config: config.cache,
            retry: config.retry,
            breaker: CircuitBreaker::new(config.breaker),
        });
        let batcher = BatchCoordinator::new(Arc::clone(&core), config.batch);
        Self {
            core,
            batcher,
            health: config.health,
        }
    }

    /// Runs `query` and decodes the data into `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: Value,
        options: RequestOptions,
    ) -> Result<QueryResponse<T>, RequestError> {
        self.request_value(query, variables, options)
            .await?
            .try_map(|data| serde_json::from_value(data).map_err(RequestError::Payload))
    }

    #[instrument(skip_all, fields(use_cache = options.use_cache, batched = options.use_batching))]
    pub async fn request_value(
        &self,
        query: &str,
        variables: Value,
        options: RequestOptions,
    ) -> Result<QueryResponse, RequestError> {
        let started = Instant::now();

        if !options.use_cache {
            let data = self.core.fetch(query, &variables).await?;
            record_latency("backend", started);
            return Ok(QueryResponse {
                data,
                from_cache: false,
                execution_time: started.elapsed(),
                cache_key: None,
            });
        }

        let key = self.core.key_for(query, &variables, &options);
        if !options.force_refresh
            && let Some(data) = self.core.cache.get(key.as_str())
        {
            debug!(key = %key, outcome = "hit", "Served from cache");
            record_latency("cache", started);
            return Ok(QueryResponse {
                data,
                from_cache: true,
                execution_time: started.elapsed(),
                cache_key: Some(key.to_string()),
            });
        }
        debug!(key = %key, outcome = "miss", force_refresh = options.force_refresh, "Fetching");

        let mut response = if options.use_batching {
            self.batcher
                .enqueue(query.to_string(), variables, options)
                .await?
        } else {
            self.core
                .fetch_and_store(query, &variables, &options)
                .await?
        };
        record_latency("backend", started);
        response.execution_time = started.elapsed();
        Ok(response)
    }

    /// Runs every item concurrently; each item carries its own outcome.
    #[instrument(skip_all, fields(items = items.len()))]
    pub async fn batch_request(&self, items: Vec<BatchItem>) -> BatchReport {
        let started = Instant::now();
        let results = join_all(items.into_iter().map(|item| async move {
            let outcome = self
                .request_value(&item.query, item.variables, item.options)
                .await;
            BatchItemResult {
                id: item.id,
                outcome,
            }
        }))
        .await;

        let mut report = BatchReport {
            results: Vec::with_capacity(results.len()),
            total_execution_time: Duration::ZERO,
            cache_hits: 0,
            cache_misses: 0,
            errors: 0,
        };
        for result in results {
            match &result.outcome {
                Ok(response) if response.from_cache => report.cache_hits += 1,
                Ok(_) => report.cache_misses += 1,
                Err(error) => {
                    warn!(id = %result.id, error = %error, "Batch item failed");
                    report.errors += 1;
                }
            }
            report.results.push(result);
        }
        report.total_execution_time = started.elapsed();
        info!(
            hits = report.cache_hits,
            misses = report.cache_misses,
            errors = report.errors,
            elapsed_ms = report.total_execution_time.as_millis() as u64,
            "Batch request complete"
        );
        report
    }

    /// Probes the cache store and the backend. The backend probe bypasses the
    /// breaker so a health check never changes its state.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthReport {
        let cache = self.core.cache.ping();
        let started = Instant::now();
        let empty = Value::Object(Default::default());
        let probe = tokio::time::timeout(
            self.health.probe_timeout,
            self.core.backend.execute(&self.health.probe_query, &empty),
        )
        .await;

        let (backend, backend_latency, backend_error) = match probe {
            Ok(Ok(_)) => (true, Some(started.elapsed()), None),
            Ok(Err(error)) => (false, None, Some(error.to_string())),
            Err(_) => (
                false,
                None,
                Some(format!(
                    "probe timed out after {} ms",
                    self.health.probe_timeout.as_millis()
                )),
            ),
        };
        let status = match (backend, cache) {
            (false, _) => HealthStatus::Unhealthy,
            (true, false) => HealthStatus::Degraded,
            (true, true) => HealthStatus::Healthy,
        };
        HealthReport {
            status,
            cache,
            backend,
            backend_latency,
            backend_error,
            breaker: self.core.breaker.state(),
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            cache: self.core.cache.stats(),
            batch: self.batcher.stats(),
            breaker: self.core.breaker.snapshot(),
        }
    }

    /// Removes matching cache entries, or all of them without a pattern.
    pub fn clear_caches(&self, pattern: Option<&str>) -> usize {
        let removed = self.core.cache.invalidate(pattern);
        info!(pattern = pattern.unwrap_or("*"), removed, "Cache cleared");
        removed
    }

    pub fn invalidate_product(&self, slug: &str) -> usize {
        let removed = self.invalidate_patterns(product_patterns(&self.core.cache_config, slug));
        info!(slug, removed, "Product cache invalidated");
        removed
    }

    pub fn invalidate_category(&self, slug: &str) -> usize {
        let removed = self.invalidate_patterns(category_patterns(&self.core.cache_config, slug));
        info!(slug, removed, "Category cache invalidated");
        removed
    }

    fn invalidate_patterns(&self, patterns: Vec<String>) -> usize {
        patterns
            .iter()
            .map(|pattern| self.core.cache.invalidate(Some(pattern)))
            .sum()
    }

    /// Key the executor would use for this request.
    pub fn cache_key(&self, query: &str, variables: &Value, options: &RequestOptions) -> CacheKey {
        self.core.key_for(query, variables, options)
    }

    pub fn cache_config(&self) -> &CacheConfig {
        &self.core.cache_config
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.core.breaker.state()
    }
}

fn record_latency(source: &'static str, started: Instant) {
    histogram!(METRIC_REQUEST_MS, "source" => source)
        .record(started.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::resilience::{BackendError, ErrorCode};

    /// Replays scripted outcomes, then echoes the variables back.
    #[derive(Default)]
    struct ScriptedBackend {
        script: Mutex<Vec<Result<Value, BackendError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn with_script(script: Vec<Result<Value, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().rev().collect()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn execute(&self, _query: &str, variables: &Value) -> Result<Value, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.script.lock().unwrap().pop();
            scripted.unwrap_or_else(|| Ok(json!({ "echo": variables })))
        }
    }

    fn executor(backend: Arc<ScriptedBackend>) -> RequestExecutor {
        RequestExecutor::new(
            backend,
            ExecutorConfig {
                retry: RetryConfig {
                    base_delay: Duration::from_millis(10),
                    ..RetryConfig::default()
                },
                ..ExecutorConfig::default()
            },
        )
    }

    const PRODUCTS: &str = "query P($first: Int) { products(first: $first) { nodes { id } } }";

    #[tokio::test(start_paused = true)]
    async fn second_identical_request_hits_cache() {
        let backend = ScriptedBackend::with_script(vec![]);
        let executor = executor(backend.clone());

        let first = executor
            .request_value(PRODUCTS, json!({"first": 3}), RequestOptions::default())
            .await
            .unwrap();
        let second = executor
            .request_value(PRODUCTS, json!({"first": 3}), RequestOptions::default())
            .await
            .unwrap();

        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.execution_time, Duration::ZERO);
        assert_eq!(first.data, second.data);
        assert_eq!(first.cache_key, second.cache_key);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn typed_request_decodes_payload() {
        #[derive(Deserialize)]
        struct Echo {
            echo: Value,
        }

        let executor = executor(ScriptedBackend::with_script(vec![]));
        let response: QueryResponse<Echo> = executor
            .request(PRODUCTS, json!({"first": 1}), RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(response.data.echo, json!({"first": 1}));

        let mismatch = executor
            .request::<Vec<u8>>(PRODUCTS, json!({"first": 2}), RequestOptions::default())
            .await;
        assert!(matches!(mismatch, Err(RequestError::Payload(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn no_cache_bypasses_store() {
        let backend = ScriptedBackend::with_script(vec![]);
        let executor = executor(backend.clone());
        let options = RequestOptions::default().no_cache();

        for _ in 0..2 {
            let response = executor
                .request_value(PRODUCTS, json!({}), options.clone())
                .await
                .unwrap();
            assert!(!response.from_cache);
            assert!(response.cache_key.is_none());
        }
        assert_eq!(backend.calls(), 2);
        assert_eq!(executor.stats().cache.total_keys, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn force_refresh_skips_lookup_but_stores() {
        let backend = ScriptedBackend::with_script(vec![Ok(json!({"v": 1})), Ok(json!({"v": 2}))]);
        let executor = executor(backend.clone());

        executor
            .request_value(PRODUCTS, json!({}), RequestOptions::default())
            .await
            .unwrap();
        let refreshed = executor
            .request_value(PRODUCTS, json!({}), RequestOptions::default().force_refresh())
            .await
            .unwrap();
        let cached = executor
            .request_value(PRODUCTS, json!({}), RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(refreshed.data, json!({"v": 2}));
        assert!(cached.from_cache);
        assert_eq!(cached.data, json!({"v": 2}));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let backend = ScriptedBackend::with_script(vec![]);
        let executor = executor(backend.clone());
        let options = RequestOptions::default().with_ttl(Duration::from_secs(5));

        executor
            .request_value(PRODUCTS, json!({}), options.clone())
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        let again = executor
            .request_value(PRODUCTS, json!({}), options)
            .await
            .unwrap();

        assert!(!again.from_cache);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_serve_stale_cache() {
        let backend = ScriptedBackend::with_script(vec![
            Ok(json!({"v": 1})),
            Err(BackendError::graphql(["Cannot query field \"nope\""])),
        ]);
        let executor = executor(backend.clone());

        executor
            .request_value(PRODUCTS, json!({}), RequestOptions::default())
            .await
            .unwrap();
        let error = executor
            .request_value(PRODUCTS, json!({}), RequestOptions::default().force_refresh())
            .await
            .unwrap_err();

        assert_eq!(error.code(), ErrorCode::InvalidField);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let backend = ScriptedBackend::with_script(vec![
            Err(BackendError::Timeout),
            Err(BackendError::Http {
                status: 503,
                body: String::new(),
            }),
        ]);
        let executor = executor(backend.clone());

        let response = executor
            .request_value(PRODUCTS, json!({}), RequestOptions::default())
            .await
            .unwrap();
        assert!(!response.from_cache);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_and_short_circuits() {
        let script = (0..5).map(|_| Err(BackendError::graphql(["bad"]))).collect();
        let backend = ScriptedBackend::with_script(script);
        let executor = executor(backend.clone());
        let options = RequestOptions::default().no_cache();

        for _ in 0..5 {
            let error = executor
                .request_value(PRODUCTS, json!({}), options.clone())
                .await
                .unwrap_err();
            assert!(!error.is_circuit_open());
        }
        let rejected = executor
            .request_value(PRODUCTS, json!({}), options)
            .await
            .unwrap_err();

        assert!(rejected.is_circuit_open());
        assert_eq!(backend.calls(), 5);
        assert_eq!(executor.breaker_state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn batched_requests_are_cached() {
        let backend = ScriptedBackend::with_script(vec![]);
        let executor = executor(backend.clone());
        let options = RequestOptions::default().batched();

        let responses = join_all((0..3).map(|n| {
            executor.request_value(PRODUCTS, json!({ "first": n }), options.clone())
        }))
        .await;
        assert!(responses.iter().all(|r| r.as_ref().is_ok_and(|r| !r.from_cache)));
        assert_eq!(executor.stats().batch.dispatches, 1);

        let cached = executor
            .request_value(PRODUCTS, json!({"first": 1}), options)
            .await
            .unwrap();
        assert!(cached.from_cache);
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_request_counts_hits_misses_and_errors() {
        let backend = ScriptedBackend::with_script(vec![]);
        let executor = executor(backend.clone());
        executor
            .request_value(PRODUCTS, json!({"first": 1}), RequestOptions::default())
            .await
            .unwrap();
        *backend.script.lock().unwrap() = vec![Err(BackendError::decode("not json"))];

        let report = executor
            .batch_request(vec![
                BatchItem::new("cached", PRODUCTS, json!({"first": 1})),
                BatchItem::new("broken", PRODUCTS, json!({"first": 2})),
            ])
            .await;

        assert_eq!(report.cache_hits, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(report.cache_misses, 0);
        assert_eq!(report.results[0].id, "cached");
        assert!(report.results[1].outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn product_invalidation_spares_unrelated_categories() {
        let executor = executor(ScriptedBackend::with_script(vec![]));
        let product = RequestOptions::default()
            .with_category(QueryCategory::Product)
            .with_context("slug=blue-mug");
        let categories = RequestOptions::default().with_category(QueryCategory::Category);

        for options in [product, categories.clone()] {
            executor
                .request_value("query { x }", json!({}), options)
                .await
                .unwrap();
        }
        executor
            .request_value(PRODUCTS, json!({}), RequestOptions::default())
            .await
            .unwrap();

        assert_eq!(executor.invalidate_product("blue-mug"), 2);
        let category = executor
            .request_value("query { x }", json!({}), categories)
            .await
            .unwrap();
        assert!(category.from_cache);
    }

    #[tokio::test(start_paused = true)]
    async fn health_reports_backend_failure() {
        let backend = ScriptedBackend::with_script(vec![Err(BackendError::network("refused"))]);
        let executor = executor(backend);

        let report = executor.health_check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.cache);
        assert!(!report.backend);
        assert!(report.backend_error.unwrap().contains("refused"));

        let report = executor.health_check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.breaker, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn health_is_degraded_without_cache() {
        let executor = RequestExecutor::new(
            ScriptedBackend::with_script(vec![]),
            ExecutorConfig {
                cache: CacheConfig {
                    enabled: false,
                    ..CacheConfig::default()
                },
                ..ExecutorConfig::default()
            },
        );
        assert_eq!(executor.health_check().await.status, HealthStatus::Degraded);
    }
}

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Value, json};
use support::{ScriptedBackend, permanent};
use tokio::time::Instant;
use vetrina::application::{
    BatchConfig, ExecutorConfig, QueryBackend, RequestExecutor, RequestOptions,
};
use vetrina::resilience::{BackendError, BreakerConfig, CircuitState, ErrorCode, RetryConfig};

const PRODUCTS: &str = r#"
    # storefront product grid
    query GetProducts($first: Int) {
        products(first: $first) { nodes { id slug name } }
    }
"#;

fn quick_retry() -> RetryConfig {
    RetryConfig {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        ..RetryConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn repeated_query_is_served_from_cache() {
    let backend = Arc::new(ScriptedBackend::new([Ok(json!({
        "products": { "nodes": [{ "id": "1" }, { "id": "2" }, { "id": "3" }] }
    }))]));
    let executor = RequestExecutor::new(backend.clone(), ExecutorConfig::default());

    let first = executor
        .request_value(PRODUCTS, json!({ "first": 3 }), RequestOptions::default())
        .await
        .expect("first call");
    let second = executor
        .request_value(PRODUCTS, json!({ "first": 3 }), RequestOptions::default())
        .await
        .expect("second call");

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.execution_time, Duration::ZERO);
    assert_eq!(first.data, second.data);
    assert_eq!(backend.calls(), 1);

    let key = first.cache_key.expect("cached responses carry their key");
    assert!(key.starts_with("graphql:products:v1:default:"), "{key}");
    assert_eq!(executor.stats().cache.total_keys, 1);
}

#[tokio::test(start_paused = true)]
async fn whitespace_and_comments_share_a_cache_entry() {
    let backend = Arc::new(ScriptedBackend::default());
    let executor = RequestExecutor::new(backend.clone(), ExecutorConfig::default());

    executor
        .request_value(PRODUCTS, json!({ "first": 3 }), RequestOptions::default())
        .await
        .expect("first call");
    let compact = "query GetProducts($first: Int) { products(first: $first) { nodes { id slug name } } }";
    let again = executor
        .request_value(compact, json!({ "first": 3 }), RequestOptions::default())
        .await
        .expect("second call");

    assert!(again.from_cache);
    assert_eq!(backend.calls(), 1);
}

/// Fails only the request whose `n` variable matches.
struct FailOn(u64);

#[async_trait]
impl QueryBackend for FailOn {
    async fn execute(&self, _query: &str, variables: &Value) -> Result<Value, BackendError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if variables["n"].as_u64() == Some(self.0) {
            Err(permanent())
        } else {
            Ok(json!({ "n": variables["n"] }))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn batched_siblings_resolve_independently() {
    let executor = RequestExecutor::new(
        Arc::new(FailOn(3)),
        ExecutorConfig {
            batch: BatchConfig {
                delay: Duration::from_millis(10),
                max_size: 5,
            },
            retry: quick_retry(),
            ..ExecutorConfig::default()
        },
    );
    let options = RequestOptions::default().batched();

    let results = join_all(
        (1..=5).map(|n| executor.request_value(PRODUCTS, json!({ "n": n }), options.clone())),
    )
    .await;

    assert_eq!(executor.stats().batch.dispatches, 1);
    for (index, result) in results.iter().enumerate() {
        let n = index as u64 + 1;
        match result {
            Ok(response) => assert_eq!(response.data, json!({ "n": n })),
            Err(error) => {
                assert_eq!(n, 3);
                assert_eq!(error.code(), ErrorCode::InvalidField);
            }
        }
    }
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn full_window_dispatches_without_waiting() {
    let backend = Arc::new(ScriptedBackend::default());
    let executor = RequestExecutor::new(
        backend.clone(),
        ExecutorConfig {
            batch: BatchConfig {
                delay: Duration::from_millis(10),
                max_size: 5,
            },
            ..ExecutorConfig::default()
        },
    );
    let options = RequestOptions::default().batched();

    let results = join_all(
        (0..6).map(|n| executor.request_value(PRODUCTS, json!({ "n": n }), options.clone())),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(executor.stats().batch.dispatches, 2);
    assert_eq!(backend.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn breaker_rejects_then_recovers_after_timeout() {
    let backend = Arc::new(ScriptedBackend::new((0..3).map(|_| Err(permanent()))));
    let executor = RequestExecutor::new(
        backend.clone(),
        ExecutorConfig {
            retry: RetryConfig::none(),
            breaker: BreakerConfig {
                threshold: 3,
                timeout: Duration::from_secs(60),
            },
            ..ExecutorConfig::default()
        },
    );
    let options = RequestOptions::default().no_cache();

    for _ in 0..3 {
        let error = executor
            .request_value(PRODUCTS, json!({}), options.clone())
            .await
            .expect_err("scripted failure");
        assert!(!error.is_circuit_open());
    }
    assert_eq!(executor.breaker_state(), CircuitState::Open);

    let rejected = executor
        .request_value(PRODUCTS, json!({}), options.clone())
        .await
        .expect_err("breaker is open");
    assert!(rejected.is_circuit_open());
    assert_eq!(rejected.code(), ErrorCode::CircuitOpen);
    assert_eq!(backend.calls(), 3);

    tokio::time::advance(Duration::from_secs(61)).await;
    executor
        .request_value(PRODUCTS, json!({}), options)
        .await
        .expect("trial call succeeds");

    let breaker = executor.stats().breaker;
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.failure_count, 0);
    assert_eq!(backend.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn retry_waits_with_exponential_backoff() {
    let backend = Arc::new(ScriptedBackend::new([
        Err(BackendError::Timeout),
        Err(BackendError::network("connection reset")),
    ]));
    let executor = RequestExecutor::new(backend.clone(), ExecutorConfig::default());

    let started = Instant::now();
    executor
        .request_value(PRODUCTS, json!({}), RequestOptions::default())
        .await
        .expect("third attempt succeeds");
    let elapsed = started.elapsed();

    assert_eq!(backend.calls(), 3);
    assert!(elapsed >= Duration::from_millis(3000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(3100), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_are_not_retried() {
    let backend = Arc::new(ScriptedBackend::new([Err(permanent())]));
    let executor = RequestExecutor::new(backend.clone(), ExecutorConfig::default());

    let started = Instant::now();
    let error = executor
        .request_value(PRODUCTS, json!({}), RequestOptions::default())
        .await
        .expect_err("permanent failure");

    assert_eq!(error.code(), ErrorCode::InvalidField);
    assert_eq!(error.attempts(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_attempts() {
    let backend = Arc::new(ScriptedBackend::new(
        (0..3).map(|_| Err(BackendError::Http {
            status: 503,
            body: "maintenance".to_string(),
        })),
    ));
    let executor = RequestExecutor::new(
        backend.clone(),
        ExecutorConfig {
            retry: quick_retry(),
            ..ExecutorConfig::default()
        },
    );

    let error = executor
        .request_value(PRODUCTS, json!({}), RequestOptions::default())
        .await
        .expect_err("every attempt fails");

    assert_eq!(error.code(), ErrorCode::Http(503));
    assert_eq!(error.attempts(), 3);
    assert_eq!(backend.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn clear_caches_accepts_glob_patterns() {
    let executor = RequestExecutor::new(Arc::new(ScriptedBackend::default()), ExecutorConfig::default());
    for n in 0..3 {
        executor
            .request_value(PRODUCTS, json!({ "first": n }), RequestOptions::default())
            .await
            .expect("cached");
    }
    executor
        .request_value(
            "query { productCategories { nodes { id } } }",
            json!({}),
            RequestOptions::default(),
        )
        .await
        .expect("cached");

    assert_eq!(executor.clear_caches(Some("graphql:products:*")), 3);
    assert_eq!(executor.stats().cache.total_keys, 1);
    assert_eq!(executor.clear_caches(None), 1);
}

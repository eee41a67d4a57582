use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::application::{METRIC_BATCH_DISPATCH, METRIC_BATCH_SIZE, METRIC_REQUEST_MS};
use crate::cache::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
use crate::config::{LogFormat, LoggingSettings};
use crate::prefetch::{
    METRIC_PREFETCH_EVICTED, METRIC_PREFETCH_EXECUTED, METRIC_PREFETCH_QUEUE_LEN,
};
use crate::resilience::{METRIC_BREAKER_OPEN, METRIC_BREAKER_REJECTED, METRIC_RETRY_ATTEMPT};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Registers units and descriptions with the installed metrics recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(METRIC_CACHE_HIT, Unit::Count, "Response cache hits.");
        describe_counter!(METRIC_CACHE_MISS, Unit::Count, "Response cache misses.");
        describe_counter!(
            METRIC_CACHE_EVICT,
            Unit::Count,
            "Response cache evictions due to capacity."
        );
        describe_histogram!(
            METRIC_REQUEST_MS,
            Unit::Milliseconds,
            "Request latency by source (cache or backend)."
        );
        describe_counter!(
            METRIC_RETRY_ATTEMPT,
            Unit::Count,
            "Backend attempts made under the retry policy."
        );
        describe_counter!(METRIC_BREAKER_OPEN, Unit::Count, "Circuit breaker trips.");
        describe_counter!(
            METRIC_BREAKER_REJECTED,
            Unit::Count,
            "Calls rejected while the circuit was open."
        );
        describe_counter!(
            METRIC_BATCH_DISPATCH,
            Unit::Count,
            "Batch windows dispatched, by reason."
        );
        describe_histogram!(METRIC_BATCH_SIZE, Unit::Count, "Requests per dispatched window.");
        describe_counter!(
            METRIC_PREFETCH_EXECUTED,
            Unit::Count,
            "Prefetch tasks finished, by outcome."
        );
        describe_counter!(
            METRIC_PREFETCH_EVICTED,
            Unit::Count,
            "Prefetch tasks dropped from a full queue."
        );
        describe_gauge!(
            METRIC_PREFETCH_QUEUE_LEN,
            Unit::Count,
            "Prefetch tasks waiting in the queue."
        );
    });
}

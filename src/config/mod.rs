//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::{BatchConfig, ExecutorConfig, HealthConfig};
use crate::cache::{CacheConfig, CategoryTtls, PeakHours};
use crate::prefetch::PrefetchConfig;
use crate::resilience::{BreakerConfig, RetryConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vetrina";
const ENV_PREFIX: &str = "VETRINA";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Command-line arguments for the vetrina binary.
#[derive(Debug, Parser)]
#[command(
    name = "vetrina",
    version,
    about = "Cached, batched and circuit-broken GraphQL storefront client"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "VETRINA_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run one query through the cache and resilience stack.
    Query(QueryArgs),
    /// Probe the cache and the backend.
    Health,
    /// Warm the storefront queries into the response cache.
    Warm,
    /// Warm the cache, then print executor statistics.
    Stats,
}

#[derive(Debug, Args, Clone)]
pub struct QueryArgs {
    /// File holding the GraphQL document.
    #[arg(long = "query-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub query_file: PathBuf,

    /// Variables as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub variables: Option<String>,

    /// Bypass the response cache entirely.
    #[arg(long = "no-cache", action = clap::ArgAction::SetTrue)]
    pub no_cache: bool,

    /// Skip the cache lookup but store the fresh result.
    #[arg(long = "force-refresh", action = clap::ArgAction::SetTrue)]
    pub force_refresh: bool,

    /// Run the query this many times in sequence.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub repeat: u32,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the GraphQL endpoint URL.
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url, global = true)]
    pub endpoint: Option<String>,

    /// Override the tracing level (e.g. info, debug).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON when set to true.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub backend: BackendSettings,
    pub cache: CacheConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub prefetch: PrefetchConfig,
    pub health: HealthConfig,
}

impl Settings {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            cache: self.cache.clone(),
            retry: self.retry.clone(),
            breaker: self.breaker.clone(),
            batch: self.batch.clone(),
            health: self.health.clone(),
        }
    }

    pub fn prefetch_config(&self) -> PrefetchConfig {
        self.prefetch.clone()
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Required by the commands that reach the network.
    pub endpoint: Option<Url>,
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    backend: RawBackendSettings,
    cache: RawCacheSettings,
    batch: RawBatchSettings,
    retry: RawRetrySettings,
    circuit_breaker: RawBreakerSettings,
    prefetch: RawPrefetchSettings,
    health: RawHealthSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(endpoint) = overrides.endpoint.as_ref() {
            self.backend.endpoint = Some(endpoint.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            backend,
            cache,
            batch,
            retry,
            circuit_breaker,
            prefetch,
            health,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            backend: build_backend_settings(backend)?,
            cache: build_cache_settings(cache)?,
            batch: build_batch_settings(batch)?,
            retry: build_retry_settings(retry)?,
            breaker: build_breaker_settings(circuit_breaker)?,
            prefetch: build_prefetch_settings(prefetch)?,
            health: build_health_settings(health)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_backend_settings(backend: RawBackendSettings) -> Result<BackendSettings, LoadError> {
    let endpoint = match non_blank(backend.endpoint) {
        Some(value) => {
            let url = Url::parse(&value)
                .map_err(|err| LoadError::invalid("backend.endpoint", err.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "backend.endpoint",
                    format!("unsupported scheme `{}`", url.scheme()),
                ));
            }
            Some(url)
        }
        None => None,
    };

    let request_timeout = positive_millis(
        backend.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        "backend.request_timeout_ms",
    )?;

    let user_agent = non_blank(backend.user_agent)
        .unwrap_or_else(|| format!("vetrina/{}", env!("CARGO_PKG_VERSION")));

    Ok(BackendSettings {
        endpoint,
        auth_token: non_blank(backend.auth_token),
        request_timeout,
        user_agent,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let defaults = CacheConfig::default();

    let capacity = cache.capacity.unwrap_or(defaults.capacity);
    if capacity == 0 {
        return Err(LoadError::invalid(
            "cache.capacity",
            "must be greater than zero",
        ));
    }

    let namespace = non_blank(cache.namespace).unwrap_or(defaults.namespace);
    if namespace.contains(':') {
        return Err(LoadError::invalid(
            "cache.namespace",
            "must not contain `:`",
        ));
    }
    let version = non_blank(cache.version).unwrap_or(defaults.version);
    if version.contains(':') {
        return Err(LoadError::invalid("cache.version", "must not contain `:`"));
    }

    let min_ttl = cache
        .min_ttl_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.min_ttl);

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        capacity,
        namespace,
        version,
        ttl: build_ttl_table(cache.ttl, defaults.ttl)?,
        min_ttl,
        peak: build_peak_hours(cache.peak, defaults.peak)?,
        user_factor: positive_factor(
            cache.user_factor.unwrap_or(defaults.user_factor),
            "cache.user_factor",
        )?,
        static_factor: positive_factor(
            cache.static_factor.unwrap_or(defaults.static_factor),
            "cache.static_factor",
        )?,
    })
}

fn build_ttl_table(ttl: RawTtlSettings, defaults: CategoryTtls) -> Result<CategoryTtls, LoadError> {
    let pick = |value: Option<u64>, fallback: Duration, key: &'static str| match value {
        Some(secs) => positive_secs(secs, key),
        None => Ok(fallback),
    };

    Ok(CategoryTtls {
        product: pick(ttl.product, defaults.product, "cache.ttl.product")?,
        product_list: pick(
            ttl.product_list,
            defaults.product_list,
            "cache.ttl.product_list",
        )?,
        category: pick(ttl.category, defaults.category, "cache.ttl.category")?,
        search: pick(ttl.search, defaults.search, "cache.ttl.search")?,
        homepage: pick(ttl.homepage, defaults.homepage, "cache.ttl.homepage")?,
        user: pick(ttl.user, defaults.user, "cache.ttl.user")?,
        default: pick(ttl.default, defaults.default, "cache.ttl.default")?,
    })
}

fn build_peak_hours(peak: RawPeakSettings, defaults: PeakHours) -> Result<PeakHours, LoadError> {
    let start_hour = peak.start_hour.unwrap_or(defaults.start_hour);
    if start_hour > 23 {
        return Err(LoadError::invalid(
            "cache.peak.start_hour",
            "must be between 0 and 23",
        ));
    }
    let end_hour = peak.end_hour.unwrap_or(defaults.end_hour);
    if end_hour > 23 {
        return Err(LoadError::invalid(
            "cache.peak.end_hour",
            "must be between 0 and 23",
        ));
    }

    let timezone = match non_blank(peak.timezone) {
        Some(name) => name
            .parse::<Tz>()
            .map_err(|err| LoadError::invalid("cache.peak.timezone", err.to_string()))?,
        None => defaults.timezone,
    };

    Ok(PeakHours {
        enabled: peak.enabled.unwrap_or(defaults.enabled),
        start_hour,
        end_hour,
        factor: positive_factor(peak.factor.unwrap_or(defaults.factor), "cache.peak.factor")?,
        timezone,
    })
}

fn build_batch_settings(batch: RawBatchSettings) -> Result<BatchConfig, LoadError> {
    let defaults = BatchConfig::default();
    let max_size = batch.max_size.unwrap_or(defaults.max_size);
    if max_size == 0 {
        return Err(LoadError::invalid(
            "batch.max_size",
            "must be greater than zero",
        ));
    }

    Ok(BatchConfig {
        delay: batch
            .delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.delay),
        max_size,
    })
}

fn build_retry_settings(retry: RawRetrySettings) -> Result<RetryConfig, LoadError> {
    let defaults = RetryConfig::default();

    let max_retries = retry.max_retries.unwrap_or(defaults.max_retries);
    if max_retries == 0 {
        return Err(LoadError::invalid(
            "retry.max_retries",
            "counts total attempts and must be at least 1",
        ));
    }

    let multiplier = retry.multiplier.unwrap_or(defaults.multiplier);
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(LoadError::invalid(
            "retry.multiplier",
            "must be a finite number of at least 1.0",
        ));
    }

    let base_delay = retry
        .base_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.base_delay);
    let max_delay = retry
        .max_delay_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.max_delay);
    if max_delay < base_delay {
        return Err(LoadError::invalid(
            "retry.max_delay_ms",
            "must not be smaller than retry.base_delay_ms",
        ));
    }

    Ok(RetryConfig {
        max_retries,
        base_delay,
        max_delay,
        multiplier,
    })
}

fn build_breaker_settings(breaker: RawBreakerSettings) -> Result<BreakerConfig, LoadError> {
    let defaults = BreakerConfig::default();

    let threshold = breaker.threshold.unwrap_or(defaults.threshold);
    if threshold == 0 {
        return Err(LoadError::invalid(
            "circuit_breaker.threshold",
            "must be greater than zero",
        ));
    }

    let timeout = match breaker.timeout_secs {
        Some(secs) => positive_secs(secs, "circuit_breaker.timeout_secs")?,
        None => defaults.timeout,
    };

    Ok(BreakerConfig { threshold, timeout })
}

fn build_prefetch_settings(prefetch: RawPrefetchSettings) -> Result<PrefetchConfig, LoadError> {
    let defaults = PrefetchConfig::default();

    let max_concurrent = prefetch.max_concurrent.unwrap_or(defaults.max_concurrent);
    if max_concurrent == 0 {
        return Err(LoadError::invalid(
            "prefetch.max_concurrent",
            "must be greater than zero",
        ));
    }
    let max_queue_size = prefetch.max_queue_size.unwrap_or(defaults.max_queue_size);
    if max_queue_size == 0 {
        return Err(LoadError::invalid(
            "prefetch.max_queue_size",
            "must be greater than zero",
        ));
    }
    let cache_capacity = prefetch.cache_capacity.unwrap_or(defaults.cache_capacity);
    if cache_capacity == 0 {
        return Err(LoadError::invalid(
            "prefetch.cache_capacity",
            "must be greater than zero",
        ));
    }

    let task_history_len = prefetch
        .task_history_len
        .unwrap_or(defaults.task_history_len);
    if task_history_len == 0 {
        return Err(LoadError::invalid(
            "prefetch.task_history_len",
            "must be greater than zero",
        ));
    }

    let default_ttl = match prefetch.default_ttl_secs {
        Some(secs) => positive_secs(secs, "prefetch.default_ttl_secs")?,
        None => defaults.default_ttl,
    };
    let idle_after = match prefetch.idle_after_ms {
        Some(ms) => positive_millis(ms, "prefetch.idle_after_ms")?,
        None => defaults.idle_after,
    };

    Ok(PrefetchConfig {
        max_concurrent,
        max_queue_size,
        default_ttl,
        enable_predictive: prefetch.enable_predictive.unwrap_or(defaults.enable_predictive),
        enable_route_prefetch: prefetch
            .enable_route_prefetch
            .unwrap_or(defaults.enable_route_prefetch),
        idle_after,
        hover_delay: prefetch
            .hover_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.hover_delay),
        route_history_len: prefetch
            .route_history_len
            .unwrap_or(defaults.route_history_len),
        cache_capacity,
        task_history_len,
    })
}

fn build_health_settings(health: RawHealthSettings) -> Result<HealthConfig, LoadError> {
    let defaults = HealthConfig::default();

    let probe_timeout = match health.probe_timeout_ms {
        Some(ms) => positive_millis(ms, "health.probe_timeout_ms")?,
        None => defaults.probe_timeout,
    };

    Ok(HealthConfig {
        probe_query: non_blank(health.probe_query).unwrap_or(defaults.probe_query),
        probe_timeout,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBackendSettings {
    endpoint: Option<String>,
    auth_token: Option<String>,
    request_timeout_ms: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    capacity: Option<usize>,
    namespace: Option<String>,
    version: Option<String>,
    min_ttl_secs: Option<u64>,
    ttl: RawTtlSettings,
    peak: RawPeakSettings,
    user_factor: Option<f64>,
    static_factor: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTtlSettings {
    product: Option<u64>,
    product_list: Option<u64>,
    category: Option<u64>,
    search: Option<u64>,
    homepage: Option<u64>,
    user: Option<u64>,
    default: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPeakSettings {
    enabled: Option<bool>,
    start_hour: Option<u32>,
    end_hour: Option<u32>,
    factor: Option<f64>,
    timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBatchSettings {
    delay_ms: Option<u64>,
    max_size: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetrySettings {
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBreakerSettings {
    threshold: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPrefetchSettings {
    max_concurrent: Option<usize>,
    max_queue_size: Option<usize>,
    default_ttl_secs: Option<u64>,
    enable_predictive: Option<bool>,
    enable_route_prefetch: Option<bool>,
    idle_after_ms: Option<u64>,
    hover_delay_ms: Option<u64>,
    route_history_len: Option<usize>,
    cache_capacity: Option<usize>,
    task_history_len: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHealthSettings {
    probe_timeout_ms: Option<u64>,
    probe_query: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn positive_factor(value: f64, key: &'static str) -> Result<f64, LoadError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(LoadError::invalid(key, "must be a positive finite number"));
    }
    Ok(value)
}

//! Application services: the request executor and what is built on it.

pub mod backend;
pub mod batch;
pub mod catalog;
pub mod error;
pub mod executor;
pub mod warmer;

pub use backend::QueryBackend;
pub use batch::{BatchConfig, BatchCoordinator, BatchHandler, BatchStats, BatchedRequest};
pub(crate) use batch::{METRIC_BATCH_DISPATCH, METRIC_BATCH_SIZE};
pub use catalog::{Catalog, CatalogPredictions, PrefetchOptions};
pub(crate) use executor::METRIC_REQUEST_MS;
pub use executor::{
    BatchItem, BatchItemResult, BatchReport, ExecutorConfig, ExecutorStats, HealthConfig,
    HealthReport, HealthStatus, QueryResponse, RequestExecutor, RequestOptions,
};
pub use warmer::{CacheWarmer, WarmFailure, WarmReport, WarmRequest};

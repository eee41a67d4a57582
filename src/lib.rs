//! Request-optimization core for a GraphQL storefront.
//!
//! [`application::RequestExecutor`] fronts a [`application::QueryBackend`] with a TTL
//! response cache, time-windowed batching, retry with capped backoff and a shared
//! circuit breaker. [`prefetch::PrefetchScheduler`] speculatively warms data on
//! hover, idle, scroll and route signals.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod prefetch;
pub mod resilience;
pub mod timer;
pub mod util;

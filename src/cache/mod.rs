//! Response cache.
//!
//! An in-process TTL cache keyed by a fingerprint of the normalized query, its
//! variables and an optional scope:
//!
//! - **keys**: fingerprinting and semantic categories
//! - **ttl**: per-category TTL with peak-hours and scope adjustments
//! - **store**: the LRU-bounded store with lazy expiry
//! - **invalidation**: glob patterns and entity-level pattern sets
//!
//! ```toml
//! [cache]
//! capacity = 1000
//! namespace = "graphql"
//! version = "v1"
//! # ... see config.rs for all options
//! ```

mod config;
mod invalidation;
mod keys;
mod store;
mod ttl;

pub use config::{CacheConfig, CategoryTtls, PeakHours};
pub use invalidation::{category_patterns, pattern_matches, product_patterns};
pub use keys::{
    CacheKey, KeySpec, QueryCategory, category_pattern, context_pattern, entity_context,
    normalize_query, query_hash,
};
pub use store::{CacheEntry, CacheStats, ResponseCache};
pub(crate) use store::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
pub use ttl::{TtlPolicy, TtlScope};

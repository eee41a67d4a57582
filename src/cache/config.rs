//! Response cache configuration.
//!
//! Controls capacity, key scoping and the TTL policy via the `[cache]` section.

use std::num::NonZeroUsize;
use std::time::Duration;

use chrono_tz::Tz;

use super::keys::QueryCategory;

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_NAMESPACE: &str = "graphql";
const DEFAULT_VERSION: &str = "v1";
const DEFAULT_MIN_TTL_SECS: u64 = 60;
const DEFAULT_USER_FACTOR: f64 = 0.8;
const DEFAULT_STATIC_FACTOR: f64 = 1.5;

const DEFAULT_PRODUCT_TTL_SECS: u64 = 1800;
const DEFAULT_PRODUCT_LIST_TTL_SECS: u64 = 600;
const DEFAULT_CATEGORY_TTL_SECS: u64 = 3600;
const DEFAULT_SEARCH_TTL_SECS: u64 = 300;
const DEFAULT_HOMEPAGE_TTL_SECS: u64 = 900;
const DEFAULT_USER_TTL_SECS: u64 = 300;
const DEFAULT_FALLBACK_TTL_SECS: u64 = 600;

const DEFAULT_PEAK_START_HOUR: u32 = 9;
const DEFAULT_PEAK_END_HOUR: u32 = 17;
const DEFAULT_PEAK_FACTOR: f64 = 0.7;

/// Response cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false the cache behaves as a permanently unavailable store.
    pub enabled: bool,
    /// Maximum live entries before LRU eviction.
    pub capacity: usize,
    /// First key segment; keeps independent caches from colliding.
    pub namespace: String,
    /// Bumped to invalidate every key after a schema change.
    pub version: String,
    pub ttl: CategoryTtls,
    /// Floor applied to every computed TTL.
    pub min_ttl: Duration,
    pub peak: PeakHours,
    /// Multiplier for user-scoped queries.
    pub user_factor: f64,
    /// Multiplier for queries flagged as static data.
    pub static_factor: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CAPACITY,
            namespace: DEFAULT_NAMESPACE.to_string(),
            version: DEFAULT_VERSION.to_string(),
            ttl: CategoryTtls::default(),
            min_ttl: Duration::from_secs(DEFAULT_MIN_TTL_SECS),
            peak: PeakHours::default(),
            user_factor: DEFAULT_USER_FACTOR,
            static_factor: DEFAULT_STATIC_FACTOR,
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Same settings under a different key namespace.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self.clone()
        }
    }
}

/// Base TTL per query category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryTtls {
    pub product: Duration,
    pub product_list: Duration,
    pub category: Duration,
    pub search: Duration,
    pub homepage: Duration,
    pub user: Duration,
    pub default: Duration,
}

impl Default for CategoryTtls {
    fn default() -> Self {
        Self {
            product: Duration::from_secs(DEFAULT_PRODUCT_TTL_SECS),
            product_list: Duration::from_secs(DEFAULT_PRODUCT_LIST_TTL_SECS),
            category: Duration::from_secs(DEFAULT_CATEGORY_TTL_SECS),
            search: Duration::from_secs(DEFAULT_SEARCH_TTL_SECS),
            homepage: Duration::from_secs(DEFAULT_HOMEPAGE_TTL_SECS),
            user: Duration::from_secs(DEFAULT_USER_TTL_SECS),
            default: Duration::from_secs(DEFAULT_FALLBACK_TTL_SECS),
        }
    }
}

impl CategoryTtls {
    pub fn for_category(&self, category: QueryCategory) -> Duration {
        match category {
            QueryCategory::Product => self.product,
            QueryCategory::ProductList => self.product_list,
            QueryCategory::Category => self.category,
            QueryCategory::Search => self.search,
            QueryCategory::Homepage => self.homepage,
            QueryCategory::User => self.user,
            QueryCategory::Default => self.default,
        }
    }
}

/// Local-time window during which TTLs are shortened.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakHours {
    pub enabled: bool,
    /// Inclusive start hour (0..=23).
    pub start_hour: u32,
    /// Inclusive end hour (0..=23). A value below `start_hour` wraps past midnight.
    pub end_hour: u32,
    pub factor: f64,
    pub timezone: Tz,
}

impl Default for PeakHours {
    fn default() -> Self {
        Self {
            enabled: true,
            start_hour: DEFAULT_PEAK_START_HOUR,
            end_hour: DEFAULT_PEAK_END_HOUR,
            factor: DEFAULT_PEAK_FACTOR,
            timezone: Tz::UTC,
        }
    }
}

impl PeakHours {
    pub fn contains(&self, hour: u32) -> bool {
        if !self.enabled {
            return false;
        }
        if self.start_hour <= self.end_hour {
            (self.start_hour..=self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour <= self.end_hour
        }
    }
}

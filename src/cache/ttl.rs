//! TTL policy: category base TTL, adjusted for peak hours and scope, floored.

use std::time::Duration;

use time::OffsetDateTime;

use super::config::CacheConfig;
use super::keys::QueryCategory;
use crate::util::timezone::local_hour;

/// Modifiers that shorten or extend a category's base TTL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TtlScope {
    pub user_scoped: bool,
    pub static_data: bool,
}

#[derive(Debug, Clone)]
pub struct TtlPolicy {
    config: CacheConfig,
}

impl TtlPolicy {
    pub fn new(config: CacheConfig) -> Self {
        Self { config }
    }

    pub fn ttl(&self, category: QueryCategory, scope: TtlScope) -> Duration {
        self.ttl_at(category, scope, OffsetDateTime::now_utc())
    }

    pub fn ttl_at(&self, category: QueryCategory, scope: TtlScope, now: OffsetDateTime) -> Duration {
        let mut factor = 1.0;
        if self
            .config
            .peak
            .contains(local_hour(now, self.config.peak.timezone))
        {
            factor *= self.config.peak.factor;
        }
        if scope.user_scoped {
            factor *= self.config.user_factor;
        }
        if scope.static_data {
            factor *= self.config.static_factor;
        }

        let base = self.config.ttl.for_category(category).as_secs_f64();
        let secs = (base * factor).floor();
        let computed = if secs.is_finite() && secs > 0.0 {
            Duration::from_secs(secs as u64)
        } else {
            Duration::ZERO
        };
        computed.max(self.config.min_ttl)
    }
}

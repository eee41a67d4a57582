//! Route history and predictive prefetch heuristics.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;

use super::task::{FetchFuture, Priority};

/// Bounded navigation history with per-route visit counts.
#[derive(Debug, Clone)]
pub struct RouteHistory {
    recent: VecDeque<String>,
    visits: HashMap<String, u64>,
    limit: usize,
}

impl RouteHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(limit),
            visits: HashMap::new(),
            limit: limit.max(1),
        }
    }

    pub fn record(&mut self, route: &str) {
        self.recent.push_back(route.to_string());
        while self.recent.len() > self.limit {
            self.recent.pop_front();
        }
        *self.visits.entry(route.to_string()).or_default() += 1;
    }

    pub fn recent(&self) -> Vec<String> {
        self.recent.iter().cloned().collect()
    }

    pub fn visits(&self, route: &str) -> u64 {
        self.visits.get(route).copied().unwrap_or(0)
    }

    pub fn visit_counts(&self) -> HashMap<String, u64> {
        self.visits.clone()
    }
}

/// What a predicted prefetch should load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictedData {
    Categories { first: u32 },
    FeaturedProducts { first: u32 },
    Products { first: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutePrediction {
    pub name: &'static str,
    pub data: PredictedData,
    pub priority: Priority,
    pub cache_key: &'static str,
    pub ttl: Duration,
}

/// Turns a prediction into a fetch. Implemented by whatever owns the queries.
pub trait PredictionFetcher<V>: Send + Sync {
    fn fetch(&self, prediction: &RoutePrediction) -> FetchFuture<V>;
}

const SHORT_TTL: Duration = Duration::from_secs(300);
const LONG_TTL: Duration = Duration::from_secs(600);

/// Static heuristics keyed off the route just entered. Predictions are
/// speculative, so they never outrank medium-priority work a caller queued.
pub fn predict(route: &str) -> Vec<RoutePrediction> {
    if route == "/" {
        return vec![
            RoutePrediction {
                name: "homepage-categories",
                data: PredictedData::Categories { first: 10 },
                priority: Priority::Medium,
                cache_key: "prefetch:categories:homepage",
                ttl: LONG_TTL,
            },
            RoutePrediction {
                name: "homepage-featured",
                data: PredictedData::FeaturedProducts { first: 6 },
                priority: Priority::Low,
                cache_key: "prefetch:featured:homepage",
                ttl: SHORT_TTL,
            },
        ];
    }
    if route.starts_with("/search") {
        return vec![RoutePrediction {
            name: "search-products",
            data: PredictedData::Products { first: 8 },
            priority: Priority::Medium,
            cache_key: "prefetch:products:list",
            ttl: SHORT_TTL,
        }];
    }
    if route.starts_with("/product/") {
        return vec![RoutePrediction {
            name: "product-categories",
            data: PredictedData::Categories { first: 5 },
            priority: Priority::Low,
            cache_key: "prefetch:categories:product",
            ttl: LONG_TTL,
        }];
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded_but_visits_are_not() {
        let mut history = RouteHistory::new(3);
        for route in ["/", "/search", "/", "/product/a", "/"] {
            history.record(route);
        }
        assert_eq!(history.recent(), vec!["/", "/product/a", "/"]);
        assert_eq!(history.visits("/"), 3);
        assert_eq!(history.visits("/search"), 1);
        assert_eq!(history.visits("/cart"), 0);
    }

    #[test]
    fn homepage_predicts_categories_and_featured() {
        let predictions = predict("/");
        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].data, PredictedData::Categories { first: 10 });
        assert_eq!(predictions[0].priority, Priority::Medium);
        assert_eq!(predictions[1].data, PredictedData::FeaturedProducts { first: 6 });
        assert_eq!(predictions[1].priority, Priority::Low);
    }

    #[test]
    fn predictions_stay_below_high_priority() {
        for route in ["/", "/search?q=mug", "/product/blue-mug"] {
            for prediction in predict(route) {
                assert!(
                    prediction.priority < Priority::High,
                    "{route} predicts {} at {:?}",
                    prediction.name,
                    prediction.priority
                );
            }
        }
    }

    #[test]
    fn search_and_product_routes() {
        let search = predict("/search?q=mug");
        assert_eq!(search[0].data, PredictedData::Products { first: 8 });

        let product = predict("/product/blue-mug");
        assert_eq!(product[0].data, PredictedData::Categories { first: 5 });
        assert_eq!(product[0].ttl, Duration::from_secs(600));
    }

    #[test]
    fn unknown_routes_predict_nothing() {
        assert!(predict("/cart").is_empty());
        assert!(predict("/products").is_empty());
    }
}

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::catalog::{CATEGORIES_QUERY, FEATURED_PRODUCTS_QUERY, PRODUCTS_QUERY};
use super::executor::{RequestExecutor, RequestOptions};
use crate::cache::QueryCategory;
use crate::resilience::ErrorCode;

const DEFAULT_LIST_SIZE: u32 = 20;

#[derive(Debug, Clone)]
pub struct WarmRequest {
    pub label: String,
    pub query: String,
    pub variables: Value,
    pub options: RequestOptions,
}

impl WarmRequest {
    pub fn new(label: impl Into<String>, query: impl Into<String>, variables: Value) -> Self {
        Self {
            label: label.into(),
            query: query.into(),
            variables,
            options: RequestOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarmFailure {
    pub label: String,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    pub warmed: usize,
    pub failed: usize,
    pub failures: Vec<WarmFailure>,
}

/// Fills the executor cache ahead of traffic.
pub struct CacheWarmer {
    executor: Arc<RequestExecutor>,
}

impl CacheWarmer {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    /// Homepage panels, the category list and the first product page.
    pub fn storefront_requests() -> Vec<WarmRequest> {
        let homepage = RequestOptions::default().with_category(QueryCategory::Homepage);
        vec![
            WarmRequest::new("homepage-featured", FEATURED_PRODUCTS_QUERY, json!({ "first": 8 }))
                .with_options(homepage.clone().with_context("featured")),
            WarmRequest::new("homepage-categories", CATEGORIES_QUERY, json!({ "first": 6 }))
                .with_options(homepage.with_context("categories")),
            WarmRequest::new(
                "categories",
                CATEGORIES_QUERY,
                json!({ "first": DEFAULT_LIST_SIZE }),
            )
            .with_options(
                RequestOptions::default()
                    .with_category(QueryCategory::Category)
                    .static_data(),
            ),
            WarmRequest::new(
                "product-list",
                PRODUCTS_QUERY,
                json!({ "first": DEFAULT_LIST_SIZE }),
            )
            .with_options(RequestOptions::default().with_category(QueryCategory::ProductList)),
        ]
    }

    /// Runs every request concurrently. A failure is logged and counted; it
    /// never stops the others.
    pub async fn warm(&self, requests: Vec<WarmRequest>) -> WarmReport {
        info!(requests = requests.len(), "Warming response cache");
        let outcomes = join_all(requests.into_iter().map(|request| async move {
            let options = request.options.force_refresh();
            let outcome = self
                .executor
                .request_value(&request.query, request.variables, options)
                .await;
            (request.label, outcome)
        }))
        .await;

        let mut report = WarmReport::default();
        for (label, outcome) in outcomes {
            match outcome {
                Ok(_) => report.warmed += 1,
                Err(error) => {
                    warn!(label = %label, error = %error, "Cache warm-up request failed");
                    report.failed += 1;
                    report.failures.push(WarmFailure {
                        label,
                        code: error.code(),
                        message: error.to_string(),
                    });
                }
            }
        }
        info!(warmed = report.warmed, failed = report.failed, "Cache warm-up finished");
        report
    }
}

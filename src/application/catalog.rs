//! Typed storefront queries on top of the request executor.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::instrument;

use super::executor::{QueryResponse, RequestExecutor, RequestOptions};
use crate::cache::{QueryCategory, entity_context};
use crate::domain::catalog::{
    CategoriesPayload, Category, CategoryPage, CategoryPagePayload, Homepage, Product,
    ProductPayload, ProductsPayload,
};
use crate::prefetch::{
    FetchFuture, PredictedData, PredictionFetcher, PrefetchError, PrefetchScheduler,
    PrefetchStrategy, PrefetchTask, Priority, RoutePrediction, TaskId, Trigger,
};
use crate::resilience::RequestError;

const HOMEPAGE_FEATURED: u32 = 8;
const HOMEPAGE_CATEGORIES: u32 = 6;

macro_rules! product_card {
    () => {
        "id databaseId name slug featured averageRating reviewCount \
         image { sourceUrl altText } \
         productCategories { nodes { id name slug } } \
         ... on ProductWithPricing { price regularPrice salePrice } \
         ... on InventoriedProduct { stockStatus stockQuantity }"
    };
}

macro_rules! category_card {
    () => {
        "id databaseId name slug description count image { sourceUrl altText }"
    };
}

pub const PRODUCTS_QUERY: &str = concat!(
    "query CatalogProducts($first: Int!) { products(first: $first) { nodes { ",
    product_card!(),
    " } } }"
);

pub const PRODUCT_BY_SLUG_QUERY: &str = concat!(
    "query CatalogProduct($slug: ID!) { product(id: $slug, idType: SLUG) { ",
    product_card!(),
    " description shortDescription } }"
);

pub const SEARCH_PRODUCTS_QUERY: &str = concat!(
    "query CatalogSearch($search: String!, $first: Int!) { ",
    "products(first: $first, where: { search: $search }) { nodes { ",
    product_card!(),
    " } } }"
);

pub const CATEGORY_PAGE_QUERY: &str = concat!(
    "query CatalogCategory($slug: ID!, $first: Int!) { ",
    "productCategory(id: $slug, idType: SLUG) { ",
    category_card!(),
    " } products(first: $first, where: { category: $slug }) { nodes { ",
    product_card!(),
    " } } }"
);

pub const CATEGORIES_QUERY: &str = concat!(
    "query CatalogCategories($first: Int!) { productCategories(first: $first) { nodes { ",
    category_card!(),
    " } } }"
);

pub const FEATURED_PRODUCTS_QUERY: &str = concat!(
    "query CatalogFeatured($first: Int!) { ",
    "products(first: $first, where: { featured: true }) { nodes { ",
    product_card!(),
    " } } }"
);

/// Overrides for the prefetch conveniences; unset fields keep the defaults.
#[derive(Debug, Clone, Default)]
pub struct PrefetchOptions {
    pub priority: Option<Priority>,
    pub trigger: Option<Trigger>,
    pub delay: Option<Duration>,
}

#[derive(Clone)]
pub struct Catalog {
    executor: Arc<RequestExecutor>,
}

impl Catalog {
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    pub async fn products(&self, first: u32) -> Result<QueryResponse<Vec<Product>>, RequestError> {
        let response = self
            .executor
            .request::<ProductsPayload>(PRODUCTS_QUERY, json!({ "first": first }), list_options())
            .await?;
        Ok(response.map(ProductsPayload::into_products))
    }

    #[instrument(skip(self))]
    pub async fn product_by_slug(
        &self,
        slug: &str,
    ) -> Result<QueryResponse<Option<Product>>, RequestError> {
        let response = self
            .executor
            .request::<ProductPayload>(
                PRODUCT_BY_SLUG_QUERY,
                json!({ "slug": slug }),
                product_options(slug),
            )
            .await?;
        Ok(response.map(|payload| payload.product))
    }

    #[instrument(skip(self))]
    pub async fn search_products(
        &self,
        term: &str,
        first: u32,
    ) -> Result<QueryResponse<Vec<Product>>, RequestError> {
        let response = self
            .executor
            .request::<ProductsPayload>(
                SEARCH_PRODUCTS_QUERY,
                json!({ "search": term, "first": first }),
                RequestOptions::default().with_category(QueryCategory::Search),
            )
            .await?;
        Ok(response.map(ProductsPayload::into_products))
    }

    #[instrument(skip(self))]
    pub async fn products_by_category(
        &self,
        slug: &str,
        first: u32,
    ) -> Result<QueryResponse<CategoryPage>, RequestError> {
        let response = self
            .executor
            .request::<CategoryPagePayload>(
                CATEGORY_PAGE_QUERY,
                json!({ "slug": slug, "first": first }),
                category_options(slug),
            )
            .await?;
        Ok(response.map(CategoryPage::from))
    }

    pub async fn categories(
        &self,
        first: u32,
    ) -> Result<QueryResponse<Vec<Category>>, RequestError> {
        let response = self
            .executor
            .request::<CategoriesPayload>(
                CATEGORIES_QUERY,
                json!({ "first": first }),
                RequestOptions::default()
                    .with_category(QueryCategory::Category)
                    .static_data(),
            )
            .await?;
        Ok(response.map(CategoriesPayload::into_categories))
    }

    pub async fn featured_products(
        &self,
        first: u32,
    ) -> Result<QueryResponse<Vec<Product>>, RequestError> {
        let response = self
            .executor
            .request::<ProductsPayload>(
                FEATURED_PRODUCTS_QUERY,
                json!({ "first": first }),
                list_options().with_context("featured"),
            )
            .await?;
        Ok(response.map(ProductsPayload::into_products))
    }

    /// Featured products and categories, fetched concurrently.
    #[instrument(skip(self))]
    pub async fn homepage(&self) -> Result<Homepage, RequestError> {
        let homepage = RequestOptions::default().with_category(QueryCategory::Homepage);
        let (featured, categories) = tokio::try_join!(
            self.executor.request::<ProductsPayload>(
                FEATURED_PRODUCTS_QUERY,
                json!({ "first": HOMEPAGE_FEATURED }),
                homepage.clone().with_context("featured"),
            ),
            self.executor.request::<CategoriesPayload>(
                CATEGORIES_QUERY,
                json!({ "first": HOMEPAGE_CATEGORIES }),
                homepage.with_context("categories"),
            ),
        )?;
        Ok(Homepage {
            featured: featured.data.into_products(),
            categories: categories.data.into_categories(),
        })
    }

    /// Queues a product detail prefetch, by default on hover after 200 ms.
    pub fn prefetch_product(
        &self,
        scheduler: &PrefetchScheduler<Value>,
        slug: &str,
        options: PrefetchOptions,
    ) -> TaskId {
        let strategy = PrefetchStrategy::new(
            format!("product_{slug}"),
            options.priority.unwrap_or(Priority::Medium),
            options.trigger.unwrap_or(Trigger::Hover),
        )
        .with_delay(options.delay.unwrap_or(Duration::from_millis(200)));
        let fetch = fetch_value(
            Arc::clone(&self.executor),
            PRODUCT_BY_SLUG_QUERY,
            json!({ "slug": slug }),
            product_options(slug),
        );
        let task = PrefetchTask::new(strategy, format!("product:{slug}"), move || fetch)
            .with_ttl(Duration::from_secs(300));
        scheduler.add_prefetch(task)
    }

    /// Queues a category page prefetch, by default when idle after 500 ms.
    pub fn prefetch_category(
        &self,
        scheduler: &PrefetchScheduler<Value>,
        slug: &str,
        options: PrefetchOptions,
    ) -> TaskId {
        let strategy = PrefetchStrategy::new(
            format!("category_{slug}"),
            options.priority.unwrap_or(Priority::Low),
            options.trigger.unwrap_or(Trigger::Idle),
        )
        .with_delay(options.delay.unwrap_or(Duration::from_millis(500)));
        let fetch = fetch_value(
            Arc::clone(&self.executor),
            CATEGORY_PAGE_QUERY,
            json!({ "slug": slug, "first": 12 }),
            category_options(slug),
        );
        let task = PrefetchTask::new(strategy, format!("category:{slug}"), move || fetch)
            .with_ttl(Duration::from_secs(600));
        scheduler.add_prefetch(task)
    }
}

/// Serves route predictions from the catalog queries.
#[derive(Clone)]
pub struct CatalogPredictions {
    catalog: Catalog,
}

impl CatalogPredictions {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }
}

impl PredictionFetcher<Value> for CatalogPredictions {
    fn fetch(&self, prediction: &RoutePrediction) -> FetchFuture<Value> {
        let executor = Arc::clone(&self.catalog.executor);
        match prediction.data {
            PredictedData::Categories { first } => fetch_value(
                executor,
                CATEGORIES_QUERY,
                json!({ "first": first }),
                RequestOptions::default()
                    .with_category(QueryCategory::Category)
                    .static_data(),
            ),
            PredictedData::FeaturedProducts { first } => fetch_value(
                executor,
                FEATURED_PRODUCTS_QUERY,
                json!({ "first": first }),
                list_options().with_context("featured"),
            ),
            PredictedData::Products { first } => fetch_value(
                executor,
                PRODUCTS_QUERY,
                json!({ "first": first }),
                list_options(),
            ),
        }
    }
}

fn fetch_value(
    executor: Arc<RequestExecutor>,
    query: &'static str,
    variables: Value,
    options: RequestOptions,
) -> FetchFuture<Value> {
    async move {
        executor
            .request_value(query, variables, options)
            .await
            .map(|response| response.data)
            .map_err(PrefetchError::from)
    }
    .boxed()
}

fn list_options() -> RequestOptions {
    RequestOptions::default().with_category(QueryCategory::ProductList)
}

fn product_options(slug: &str) -> RequestOptions {
    RequestOptions::default()
        .with_category(QueryCategory::Product)
        .with_context(entity_context("slug", slug))
}

fn category_options(slug: &str) -> RequestOptions {
    RequestOptions::default()
        .with_category(QueryCategory::Category)
        .with_context(entity_context("slug", slug))
}

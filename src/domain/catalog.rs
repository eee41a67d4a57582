//! Storefront payload shapes returned by the catalog queries.

use serde::{Deserialize, Serialize};

/// GraphQL connection wrapper (`{ nodes: [...] }`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub source_url: String,
    #[serde(default)]
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRef {
    pub id: String,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    OnBackorder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub database_id: Option<u64>,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub featured: Option<bool>,
    #[serde(default)]
    pub average_rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<u32>,
    #[serde(default)]
    pub image: Option<Image>,
    #[serde(default)]
    pub product_categories: Option<Connection<CategoryRef>>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub regular_price: Option<String>,
    #[serde(default)]
    pub sale_price: Option<String>,
    #[serde(default)]
    pub stock_status: Option<StockStatus>,
    #[serde(default)]
    pub stock_quantity: Option<i64>,
}

impl Product {
    pub fn on_sale(&self) -> bool {
        self.sale_price.as_deref().is_some_and(|price| !price.is_empty())
    }

    pub fn category_slugs(&self) -> impl Iterator<Item = &str> {
        self.product_categories
            .iter()
            .flat_map(|connection| connection.nodes.iter())
            .map(|category| category.slug.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    #[serde(default)]
    pub database_id: Option<u64>,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub image: Option<Image>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductsPayload {
    #[serde(default)]
    pub products: Option<Connection<Product>>,
}

impl ProductsPayload {
    pub fn into_products(self) -> Vec<Product> {
        self.products.unwrap_or_default().nodes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPayload {
    #[serde(default)]
    pub product: Option<Product>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoriesPayload {
    #[serde(default)]
    pub product_categories: Option<Connection<Category>>,
}

impl CategoriesPayload {
    pub fn into_categories(self) -> Vec<Category> {
        self.product_categories.unwrap_or_default().nodes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPagePayload {
    #[serde(default)]
    pub product_category: Option<Category>,
    #[serde(default)]
    pub products: Option<Connection<Product>>,
}

/// A category together with the products listed under it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryPage {
    pub category: Option<Category>,
    pub products: Vec<Product>,
}

impl From<CategoryPagePayload> for CategoryPage {
    fn from(payload: CategoryPagePayload) -> Self {
        Self {
            category: payload.product_category,
            products: payload.products.unwrap_or_default().nodes,
        }
    }
}

/// Featured products and categories shown on the landing page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Homepage {
    pub featured: Vec<Product>,
    pub categories: Vec<Category>,
}

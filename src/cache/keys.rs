//! Cache key generation.
//!
//! A key is `{namespace}:{category}:{version}:{context}:{hash}` with an optional
//! `:user:{id}` suffix. The hash covers the normalized query text and the
//! serialized variables, so whitespace and comments never split entries.

use std::fmt;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::config::CacheConfig;

const HASH_LEN: usize = 16;
const DEFAULT_CONTEXT: &str = "default";

/// Semantic class of a query; selects the key prefix and the base TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryCategory {
    Product,
    ProductList,
    Category,
    Search,
    Homepage,
    User,
    Default,
}

impl QueryCategory {
    pub const ALL: [QueryCategory; 7] = [
        QueryCategory::Product,
        QueryCategory::ProductList,
        QueryCategory::Category,
        QueryCategory::Search,
        QueryCategory::Homepage,
        QueryCategory::User,
        QueryCategory::Default,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            QueryCategory::Product => "product",
            QueryCategory::ProductList => "products",
            QueryCategory::Category => "category",
            QueryCategory::Search => "search",
            QueryCategory::Homepage => "homepage",
            QueryCategory::User => "user",
            QueryCategory::Default => "default",
        }
    }

    /// Infers the category from normalized query text.
    pub fn detect(normalized: &str) -> Self {
        if normalized.contains("$search") || normalized.contains("search:") {
            return QueryCategory::Search;
        }
        match root_field(normalized) {
            Some(field) if field.starts_with("productCategor") => QueryCategory::Category,
            Some("product") => QueryCategory::Product,
            Some("products") => QueryCategory::ProductList,
            _ => QueryCategory::Default,
        }
    }
}

impl fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// First field of the top-level selection set, skipping an alias.
fn root_field(normalized: &str) -> Option<&str> {
    let (_, body) = normalized.split_once('{')?;
    let (first, rest) = take_identifier(body)?;
    if let Some(after_alias) = rest.trim_start().strip_prefix(':') {
        return take_identifier(after_alias).map(|(field, _)| field);
    }
    Some(first)
}

fn take_identifier(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    let end = input
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(input.len());
    if end == 0 {
        return None;
    }
    Some(input.split_at(end))
}

/// Strips `#` comments and collapses whitespace runs to a single space.
pub fn normalize_query(query: &str) -> String {
    let mut normalized = String::with_capacity(query.len());
    for line in query.lines() {
        let code = line.split_once('#').map_or(line, |(code, _)| code);
        for word in code.split_whitespace() {
            if !normalized.is_empty() {
                normalized.push(' ');
            }
            normalized.push_str(word);
        }
    }
    normalized
}

/// First 16 hex chars of SHA-256 over the normalized query and compact variables.
pub fn query_hash(normalized: &str, variables: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(variables.to_string().as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(HASH_LEN);
    digest
}

/// Inputs of a cache key beyond the namespace and version.
#[derive(Debug, Clone, Copy)]
pub struct KeySpec<'a> {
    pub query: &'a str,
    pub variables: &'a Value,
    pub category: Option<QueryCategory>,
    pub context: Option<&'a str>,
    pub user: Option<&'a str>,
}

impl<'a> KeySpec<'a> {
    pub fn new(query: &'a str, variables: &'a Value) -> Self {
        Self {
            query,
            variables,
            category: None,
            context: None,
            user: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    value: String,
    category: QueryCategory,
}

impl CacheKey {
    pub fn build(config: &CacheConfig, spec: &KeySpec<'_>) -> Self {
        let normalized = normalize_query(spec.query);
        let category = spec
            .category
            .unwrap_or_else(|| QueryCategory::detect(&normalized));
        let context = spec
            .context
            .filter(|context| !context.is_empty())
            .unwrap_or(DEFAULT_CONTEXT);
        let mut value = format!(
            "{}:{}:{}:{}:{}",
            config.namespace,
            category.prefix(),
            config.version,
            context,
            query_hash(&normalized, spec.variables)
        );
        if let Some(user) = spec.user {
            value.push_str(":user:");
            value.push_str(user);
        }
        Self { value, category }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn category(&self) -> QueryCategory {
        self.category
    }

    pub fn is_user_scoped(&self) -> bool {
        self.value.contains(":user:")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

/// Key context identifying a single entity, e.g. `slug=blue-mug`.
pub fn entity_context(field: &str, value: &str) -> String {
    format!("{field}={value}")
}

/// Glob pattern covering every key of `category` in the current version.
pub fn category_pattern(config: &CacheConfig, category: QueryCategory) -> String {
    format!(
        "{}:{}:{}:*",
        config.namespace,
        category.prefix(),
        config.version
    )
}

/// Glob pattern covering every key of `category` scoped to `context`.
pub fn context_pattern(config: &CacheConfig, category: QueryCategory, context: &str) -> String {
    format!(
        "{}:{}:{}:{}:*",
        config.namespace,
        category.prefix(),
        config.version,
        context
    )
}

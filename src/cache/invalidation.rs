//! Invalidation patterns.
//!
//! `*` matches any run of characters. A pattern without `*` matches as a substring.

use super::config::CacheConfig;
use super::keys::{QueryCategory, category_pattern, context_pattern, entity_context};

pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return key.contains(pattern);
    }

    let mut segments = pattern.split('*');
    let first = segments.next().unwrap_or_default();
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };

    let mut segments: Vec<&str> = segments.collect();
    let last = segments.pop().unwrap_or_default();
    for segment in segments {
        match rest.find(segment) {
            Some(at) => rest = &rest[at + segment.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

/// Patterns removed when a product changes: the product itself, every product
/// list, the homepage and every search result.
pub fn product_patterns(config: &CacheConfig, slug: &str) -> Vec<String> {
    vec![
        context_pattern(config, QueryCategory::Product, &entity_context("slug", slug)),
        category_pattern(config, QueryCategory::ProductList),
        category_pattern(config, QueryCategory::Homepage),
        category_pattern(config, QueryCategory::Search),
    ]
}

/// Patterns removed when a category changes: the category itself, every
/// product list and the homepage.
pub fn category_patterns(config: &CacheConfig, slug: &str) -> Vec<String> {
    vec![
        context_pattern(config, QueryCategory::Category, &entity_context("slug", slug)),
        category_pattern(config, QueryCategory::ProductList),
        category_pattern(config, QueryCategory::Homepage),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_without_wildcard() {
        assert!(pattern_matches("products", "graphql:products:v1:default:ab"));
        assert!(!pattern_matches("homepage", "graphql:products:v1:default:ab"));
    }

    #[test]
    fn glob_anchors_at_both_ends() {
        assert!(pattern_matches("graphql:products:*", "graphql:products:v1:x"));
        assert!(!pattern_matches("graphql:products:*", "prefetch:graphql:products:v1:x"));
        assert!(pattern_matches("*:user:42", "graphql:user:v1:default:ab:user:42"));
        assert!(!pattern_matches("*:user:42", "graphql:user:v1:default:ab:user:420"));
    }

    #[test]
    fn glob_with_inner_wildcards() {
        assert!(pattern_matches("graphql:*:v1:*:ab", "graphql:product:v1:slug=x:ab"));
        assert!(!pattern_matches("graphql:*:v2:*", "graphql:product:v1:slug=x:ab"));
        assert!(pattern_matches("*", "anything"));
    }

    #[test]
    fn overlapping_segments_do_not_double_count() {
        assert!(!pattern_matches("ab*ba", "aba"));
        assert!(pattern_matches("ab*ba", "abba"));
    }

    #[test]
    fn product_patterns_cover_dependent_views() {
        let config = CacheConfig::default();
        let patterns = product_patterns(&config, "blue-mug");
        assert_eq!(
            patterns,
            vec![
                "graphql:product:v1:slug=blue-mug:*",
                "graphql:products:v1:*",
                "graphql:homepage:v1:*",
                "graphql:search:v1:*",
            ]
        );
    }

    #[test]
    fn category_patterns_skip_search() {
        let config = CacheConfig::default();
        let patterns = category_patterns(&config, "mugs");
        assert_eq!(patterns.len(), 3);
        assert!(patterns.iter().all(|p| !p.contains(":search:")));
    }
}

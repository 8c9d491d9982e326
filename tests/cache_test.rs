//! Tests for [`ResponseCache`]: LRU eviction, sliding TTL and key derivation.

use std::time::Duration;

use bifrost::cache::{CacheConfig, ResponseCache, cache_key};
use serde_json::{Map, json};

fn options(pairs: &[(&str, serde_json::Value)]) -> Map<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

// =========================================================================
// CacheConfig
// =========================================================================

#[test]
fn cache_config_defaults() {
    let config = CacheConfig::default();
    assert_eq!(config.max_entries, 10_000);
    assert_eq!(config.ttl, Duration::from_secs(3600));
}

// =========================================================================
// Eviction
// =========================================================================

#[test]
fn reads_protect_entries_from_eviction() {
    let cache = ResponseCache::new(&CacheConfig::new().max_entries(2));
    cache.set("a", json!(1), None);
    cache.set("b", json!(2), None);
    // "a" becomes most recently used.
    assert_eq!(cache.get("a"), Some(json!(1)));

    cache.set("c", json!(3), None);

    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn replacing_a_key_does_not_grow_the_cache() {
    let cache = ResponseCache::new(&CacheConfig::new().max_entries(2));
    cache.set("a", json!(1), None);
    cache.set("a", json!(2), None);
    cache.set("b", json!(3), None);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("a"), Some(json!(2)));
    assert_eq!(cache.stats().evictions, 0);
}

#[tokio::test(start_paused = true)]
async fn ttl_slides_on_read() {
    let cache = ResponseCache::new(&CacheConfig::new().ttl(Duration::from_secs(10)));
    cache.set("hot", json!("h"), None);
    cache.set("cold", json!("c"), None);

    for _ in 0..3 {
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get("hot").is_some());
    }

    // 18s since "cold" was written or read.
    assert!(cache.get("cold").is_none());
    assert!(cache.get("hot").is_some());
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test(start_paused = true)]
async fn ttl_boundary_is_inclusive() {
    let ttl = Duration::from_secs(10);
    let cache = ResponseCache::new(&CacheConfig::new().ttl(ttl));
    cache.set("early", json!(1), None);
    cache.set("exact", json!(2), None);
    cache.set("late", json!(3), None);

    tokio::time::advance(ttl - Duration::from_millis(1)).await;
    assert_eq!(cache.get("early"), Some(json!(1)));

    tokio::time::advance(Duration::from_millis(1)).await;
    // Idle for exactly the TTL.
    assert_eq!(cache.get("exact"), Some(json!(2)));

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(cache.get("late"), None);
    assert_eq!(cache.stats().expirations, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_swept_on_insert() {
    let cache = ResponseCache::new(&CacheConfig::new().ttl(Duration::from_secs(1)));
    cache.set("old", json!(1), None);
    tokio::time::advance(Duration::from_secs(2)).await;

    cache.set("new", json!(2), None);

    assert_eq!(cache.len(), 1);
    assert!(cache.contains("new"));
}

// =========================================================================
// Keys
// =========================================================================

#[test]
fn keys_are_stable_and_namespaced() {
    let args = [json!("hello")];
    let opts = options(&[("model", json!("m")), ("temperature", json!(0.2))]);
    let reordered = options(&[("temperature", json!(0.2)), ("model", json!("m"))]);

    assert_eq!(cache_key("generate", &args, &opts), cache_key("generate", &args, &reordered));
    assert_ne!(cache_key("generate", &args, &opts), cache_key("embed", &args, &opts));
    assert_ne!(
        cache_key("generate", &args, &opts),
        cache_key("generate", &[json!("hello!")], &opts)
    );
}

#[test]
fn entry_info_reports_metadata_and_hits() {
    let cache = ResponseCache::new(&CacheConfig::default());
    cache.set("k", json!([1, 2, 3]), Some(json!({ "backend": "local" })));
    cache.get("k");

    let info = cache.entry_info("k").unwrap();
    assert_eq!(info.hits, 1);
    assert_eq!(info.metadata, Some(json!({ "backend": "local" })));
    assert!(info.size > 0);
}

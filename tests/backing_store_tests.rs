//! Tests against real Redis and Neo4j instances
//!
//! Run with `cargo test -- --ignored` after pointing SCENT_CACHE_REDIS_URL
//! and SCENT_CACHE_NEO4J_* at disposable servers.

use scent_cache::cache::{CacheSettings, CacheTierManager};
use scent_cache::{
    GlobPattern, Neo4jSettings, Neo4jTierStore, RedisTierStore, StrategyRegistry, TierKind,
    TierStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("SCENT_CACHE_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn neo4j_settings() -> Neo4jSettings {
    Neo4jSettings {
        uri: std::env::var("SCENT_CACHE_NEO4J_URI")
            .unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
        user: std::env::var("SCENT_CACHE_NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
        password: std::env::var("SCENT_CACHE_NEO4J_PASSWORD")
            .unwrap_or_else(|_| "password".to_string()),
        database: std::env::var("SCENT_CACHE_NEO4J_DATABASE")
            .unwrap_or_else(|_| "neo4j".to_string()),
    }
}

fn unique_prefix() -> String {
    format!("scent:test:{}:", uuid::Uuid::new_v4())
}

#[tokio::test]
#[ignore] // Requires running Redis instance
async fn test_redis_round_trip() {
    let store = RedisTierStore::connect(&redis_url(), unique_prefix())
        .await
        .expect("Failed to connect to Redis");

    assert_eq!(store.kind(), TierKind::Remote);
    assert!(store.health_check().await.unwrap());

    let value = json!({"families": ["woody", "amber"], "intensity": 0.7});
    store
        .write("user_profile:1", &value, Duration::from_secs(30))
        .await
        .unwrap();

    let read = store.read("user_profile:1").await.unwrap().unwrap();
    assert_eq!(read.value, value);
    assert!(read.remaining.unwrap() <= Duration::from_secs(30));
    assert!(store.delete("user_profile:1").await.unwrap());
    assert_eq!(store.read("user_profile:1").await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires running Redis instance
async fn test_redis_ttl_and_pattern_delete() {
    let store = RedisTierStore::connect(&redis_url(), unique_prefix())
        .await
        .unwrap();

    store
        .write("short", &json!(1), Duration::from_millis(300))
        .await
        .unwrap();
    let remaining = store.read("short").await.unwrap().unwrap().remaining.unwrap();
    assert!(remaining <= Duration::from_millis(300));
    for key in ["user_1", "user_2", "order_1"] {
        store.write(key, &json!(key), Duration::from_secs(30)).await.unwrap();
    }

    let removed = store
        .delete_matching(&GlobPattern::new("user_*"))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert!(store.read("order_1").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.read("short").await.unwrap(), None);
}

#[tokio::test]
#[ignore] // Requires running Neo4j instance
async fn test_neo4j_round_trip() {
    let store = Neo4jTierStore::connect(&neo4j_settings())
        .await
        .expect("Failed to connect to Neo4j");

    assert_eq!(store.kind(), TierKind::Durable);
    assert!(store.health_check().await.unwrap());

    let key = format!("test:{}", uuid::Uuid::new_v4());
    let value = json!({"description": "Cedar and smoked vanilla"});
    store.write(&key, &value, Duration::from_secs(60)).await.unwrap();

    let read = store.read(&key).await.unwrap().unwrap();
    assert_eq!(read.value, value);
    assert!(read.remaining.unwrap() <= Duration::from_secs(60));
    assert!(store.delete(&key).await.unwrap());
    assert!(!store.delete(&key).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires running Neo4j instance
async fn test_neo4j_expired_rows_hidden_and_purged() {
    let store = Neo4jTierStore::connect(&neo4j_settings()).await.unwrap();
    let key = format!("test:expiring:{}", uuid::Uuid::new_v4());

    store.write(&key, &json!(1), Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert_eq!(store.read(&key).await.unwrap(), None);
    assert!(store.purge_expired().await.unwrap() >= 1);
}

#[tokio::test]
#[ignore] // Requires running Redis and Neo4j instances
async fn test_full_chain_write_back() {
    let redis = Arc::new(
        RedisTierStore::connect(&redis_url(), unique_prefix())
            .await
            .unwrap(),
    );
    let neo4j = Arc::new(Neo4jTierStore::connect(&neo4j_settings()).await.unwrap());

    let manager = CacheTierManager::new(StrategyRegistry::defaults(), CacheSettings::default())
        .unwrap()
        .with_tier(redis.clone())
        .with_tier(neo4j.clone());

    let key = format!("user_profile:{}", uuid::Uuid::new_v4());
    neo4j
        .write(&key, &json!("from durable"), Duration::from_secs(60))
        .await
        .unwrap();

    let (_, source) = manager.get(&key, "user_profile").await.unwrap();
    assert_eq!(source, TierKind::Durable);
    assert!(redis.read(&key).await.unwrap().is_some());

    assert!(manager.invalidate(&key).await);
    assert!(neo4j.read(&key).await.unwrap().is_none());
}

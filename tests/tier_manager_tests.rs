//! Integration tests for the tier manager
//!
//! Backing tiers are in-process fakes with injectable latency and failures.

use futures::future::join_all;
use scent_cache::cache::{CacheSettings, CacheTierManager};
use scent_cache::{
    CacheError, CategoryStrategy, EvictionPolicy, InMemoryTierStore, InvalidationReason,
    StrategyRegistry, TierKind, TierStore,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn registry() -> StrategyRegistry {
    StrategyRegistry::new()
        .with_category(
            "profile",
            CategoryStrategy::new(Duration::from_secs(10), 2, EvictionPolicy::Lru),
        )
        .with_category(
            "user",
            CategoryStrategy::new(Duration::from_secs(60), 100, EvictionPolicy::Lfu).persistent(),
        )
        .with_category(
            "session",
            CategoryStrategy::new(Duration::from_secs(60), 1, EvictionPolicy::Lru).persistent(),
        )
}

fn manager() -> CacheTierManager {
    CacheTierManager::new(registry(), CacheSettings::default()).unwrap()
}

#[tokio::test]
async fn test_lru_evicts_oldest_write() {
    let manager = manager();

    for key in ["A", "B", "C"] {
        manager.set(key, "profile", json!(key), None).await.unwrap();
    }

    assert!(manager.memory_entry("A").await.is_none());
    assert!(manager.memory_entry("B").await.is_some());
    assert!(manager.memory_entry("C").await.is_some());
    assert_eq!(manager.category_len("profile").await, 2);
}

#[tokio::test]
async fn test_lru_respects_recent_reads() {
    let manager = manager();

    manager.set("A", "profile", json!(1), None).await.unwrap();
    manager.set("B", "profile", json!(2), None).await.unwrap();
    manager.get("A", "profile").await.unwrap();
    manager.set("C", "profile", json!(3), None).await.unwrap();

    assert!(manager.memory_entry("A").await.is_some());
    assert!(manager.memory_entry("B").await.is_none());
}

#[tokio::test]
async fn test_generator_runs_once() {
    let manager = manager();
    let calls = AtomicUsize::new(0);
    let counter = &calls;

    let (value, source) = manager
        .get_or_generate("k1", "profile", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"families": ["citrus"]}))
        })
        .await
        .unwrap();
    assert_eq!(source, TierKind::Generated);

    let (again, source) = manager
        .get_or_generate("k1", "profile", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json!("unused"))
        })
        .await
        .unwrap();

    assert_ne!(source, TierKind::Generated);
    assert_eq!(again, value);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeated_reads_are_stable() {
    let manager = manager();
    manager.set("k", "profile", json!([1, 2, 3]), None).await.unwrap();

    let (first, _) = manager.get("k", "profile").await.unwrap();
    let (second, _) = manager.get("k", "profile").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(manager.memory_len().await, 1);
}

#[tokio::test]
async fn test_invalidate_pattern() {
    let manager = manager();
    for key in ["user_1", "user_2", "order_1"] {
        manager.set(key, "user", json!(key), None).await.unwrap();
    }

    assert_eq!(manager.invalidate_pattern("user_*").await, 2);

    let err = manager.get("user_1", "user").await.unwrap_err();
    assert!(matches!(err, CacheError::MissingGenerator { .. }));
    assert!(manager.get("order_1", "user").await.is_ok());
}

#[tokio::test]
async fn test_invalidate_pattern_reaches_backing_tiers() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    let manager = manager().with_tier(remote.clone());
    let mut events = manager.subscribe();

    for key in ["user_1", "user_2", "order_1"] {
        manager.set(key, "user", json!(key), None).await.unwrap();
    }
    assert_eq!(remote.len().await, 3);

    manager.invalidate_pattern("user_*").await;

    let event = events.recv().await.unwrap();
    assert!(matches!(event.reason, InvalidationReason::PatternMatch { .. }));
    assert_eq!(event.keys.len(), 2);

    // Backing deletes run in the background
    for _ in 0..50 {
        if remote.len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(remote.contains("order_1").await);
    assert!(!remote.contains("user_1").await);
}

#[tokio::test]
async fn test_invalidate_removes_everywhere() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    let manager = manager().with_tier(remote.clone());

    manager.set("user_9", "user", json!(9), None).await.unwrap();
    assert!(manager.invalidate("user_9").await);
    assert!(!remote.contains("user_9").await);
    assert!(!manager.invalidate("user_9").await);
}

#[tokio::test]
async fn test_write_back_from_durable() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    let durable = Arc::new(InMemoryTierStore::new(TierKind::Durable));
    let manager = manager()
        .with_tier(durable.clone())
        .with_tier(remote.clone());
    assert_eq!(manager.tier_kinds(), vec![TierKind::Memory, TierKind::Remote, TierKind::Durable]);

    durable
        .write("user_7", &json!({"id": 7}), Duration::from_secs(60))
        .await
        .unwrap();

    let (value, source) = manager.get("user_7", "user").await.unwrap();
    assert_eq!(source, TierKind::Durable);
    assert_eq!(value, json!({"id": 7}));

    assert!(remote.contains("user_7").await);
    assert!(manager.memory_entry("user_7").await.is_some());

    let (_, source) = manager.get("user_7", "user").await.unwrap();
    assert_eq!(source, TierKind::Memory);
}

#[tokio::test]
async fn test_write_back_from_remote_skips_durable() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    let durable = Arc::new(InMemoryTierStore::new(TierKind::Durable));
    let manager = manager()
        .with_tier(remote.clone())
        .with_tier(durable.clone());

    remote
        .write("user_3", &json!(3), Duration::from_secs(60))
        .await
        .unwrap();

    let (_, source) = manager.get("user_3", "user").await.unwrap();
    assert_eq!(source, TierKind::Remote);
    assert_eq!(durable.reads(), 0);
    assert!(!durable.contains("user_3").await);
}

#[tokio::test]
async fn test_generated_value_written_to_every_tier() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    let durable = Arc::new(InMemoryTierStore::new(TierKind::Durable));
    let manager = manager()
        .with_tier(remote.clone())
        .with_tier(durable.clone());

    // Category is memory-only, but generated values always populate every tier
    manager
        .get_or_generate("k", "profile", || async { Ok(json!("fresh")) })
        .await
        .unwrap();

    assert!(remote.contains("k").await);
    assert!(durable.contains("k").await);
}

#[tokio::test]
async fn test_ttl_expiry() {
    let manager = manager();
    manager
        .set("short", "profile", json!(1), Some(Duration::from_millis(20)))
        .await
        .unwrap();
    assert!(manager.get("short", "profile").await.is_ok());

    tokio::time::sleep(Duration::from_millis(40)).await;

    let err = manager.get("short", "profile").await.unwrap_err();
    assert!(matches!(err, CacheError::MissingGenerator { .. }));
}

#[tokio::test]
async fn test_write_back_from_remote_keeps_original_expiry() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    let manager = manager().with_tier(remote.clone());

    manager
        .set("k", "session", json!("short-lived"), Some(Duration::from_millis(300)))
        .await
        .unwrap();
    // Capacity 1: pushes "k" out of memory, leaving only the remote copy
    manager.set("other", "session", json!(1), None).await.unwrap();
    assert!(manager.memory_entry("k").await.is_none());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_, source) = manager.get("k", "session").await.unwrap();
    assert_eq!(source, TierKind::Remote);

    // The copy in memory expires with the remote entry, not a full category TTL
    let entry = manager.memory_entry("k").await.unwrap();
    let lifetime = entry.metadata.expires_at - entry.metadata.created_at;
    assert!(lifetime <= chrono::Duration::milliseconds(300));

    tokio::time::sleep(Duration::from_millis(400)).await;
    let err = manager.get("k", "session").await.unwrap_err();
    assert!(matches!(err, CacheError::MissingGenerator { .. }));
}

#[tokio::test]
async fn test_write_back_from_durable_keeps_original_expiry() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    let durable = Arc::new(InMemoryTierStore::new(TierKind::Durable));
    let settings = CacheSettings::builder().persistent_ttl_jitter(1.0).build();
    let manager = CacheTierManager::new(registry(), settings)
        .unwrap()
        .with_tier(remote.clone())
        .with_tier(durable.clone());

    durable
        .write("user_8", &json!(8), Duration::from_millis(300))
        .await
        .unwrap();

    let (_, source) = manager.get("user_8", "user").await.unwrap();
    assert_eq!(source, TierKind::Durable);
    assert!(remote.contains("user_8").await);

    tokio::time::sleep(Duration::from_millis(400)).await;

    // Neither the memory nor the remote copy outlives the durable entry,
    // even with jitter configured
    assert!(!remote.contains("user_8").await);
    let err = manager.get("user_8", "user").await.unwrap_err();
    assert!(matches!(err, CacheError::MissingGenerator { .. }));
}

#[tokio::test]
async fn test_explicit_ttl_is_exact_on_backing_tiers() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    let settings = CacheSettings::builder().persistent_ttl_jitter(1.0).build();
    let manager = CacheTierManager::new(registry(), settings)
        .unwrap()
        .with_tier(remote.clone());

    manager
        .set("user_4", "user", json!(4), Some(Duration::from_millis(200)))
        .await
        .unwrap();

    let stored = remote.read("user_4").await.unwrap().unwrap();
    assert!(stored.remaining.unwrap() <= Duration::from_millis(200));
}

#[tokio::test]
async fn test_concurrent_misses_share_one_generation() {
    let manager = Arc::new(manager());
    let calls = AtomicUsize::new(0);
    let counter = &calls;

    let requests = (0..8).map(|_| {
        let manager = manager.clone();
        async move {
            manager
                .get_or_generate("hot", "profile", move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(json!("expensive"))
                })
                .await
        }
    });

    let results = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let generated = results
        .iter()
        .filter(|r| matches!(r, Ok((_, TierKind::Generated))))
        .count();
    assert_eq!(generated, 1);
    for result in results {
        assert_eq!(result.unwrap().0, json!("expensive"));
    }
}

#[tokio::test]
async fn test_concurrent_followers_see_generation_error() {
    let manager = manager();

    let leader = manager.get_or_generate("bad", "profile", || async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Err(anyhow::anyhow!("model unavailable"))
    });
    let follower = manager.get_or_generate("bad", "profile", || async { Ok(json!("never")) });

    let (leader, follower) = tokio::join!(leader, follower);

    assert!(matches!(leader, Err(CacheError::GenerationFailed { .. })));
    let err = follower.unwrap_err();
    assert!(err.is_generation_error());
    assert!(err.to_string().contains("model unavailable"));

    // Nothing was cached
    assert!(manager.memory_entry("bad").await.is_none());
}

#[tokio::test]
async fn test_generator_timeout() {
    let settings = CacheSettings::builder()
        .generation_timeout(Some(Duration::from_millis(20)))
        .build();
    let manager = CacheTierManager::new(registry(), settings).unwrap();

    let err = manager
        .get_or_generate("slow", "profile", || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(json!("late"))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::GenerationTimeout { timeout_ms: 20, .. }));
    assert!(manager.memory_entry("slow").await.is_none());
}

#[tokio::test]
async fn test_failing_backing_tier_degrades_to_miss() {
    let remote = Arc::new(InMemoryTierStore::new(TierKind::Remote));
    remote.set_failing(true);
    let manager = manager().with_tier(remote.clone());

    let (value, source) = manager
        .get_or_generate("user_1", "user", || async { Ok(json!("generated")) })
        .await
        .unwrap();
    assert_eq!(source, TierKind::Generated);
    assert_eq!(value, json!("generated"));

    // Failed read and failed write
    assert_eq!(manager.statistics().backing_store_errors, 2);

    // The memory tier still serves the value
    let (_, source) = manager.get("user_1", "user").await.unwrap();
    assert_eq!(source, TierKind::Memory);
}

#[tokio::test]
async fn test_slow_backing_tier_is_still_consulted() {
    let remote = Arc::new(
        InMemoryTierStore::new(TierKind::Remote).with_latency(Duration::from_millis(20)),
    );
    remote
        .write("user_5", &json!(5), Duration::from_secs(60))
        .await
        .unwrap();
    let manager = manager().with_tier(remote.clone());

    let (_, source) = manager.get("user_5", "user").await.unwrap();
    assert_eq!(source, TierKind::Remote);

    let stats = manager.statistics();
    assert!(stats.avg_response_time_ms >= 20.0);
}

#[tokio::test]
async fn test_statistics() {
    let manager = manager();

    manager
        .get_or_generate("a", "profile", || async { Ok(json!(1)) })
        .await
        .unwrap();
    manager.get("a", "profile").await.unwrap();
    manager.get("a", "profile").await.unwrap();
    let _ = manager.get("missing", "profile").await;

    let stats = manager.statistics();
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.per_tier.memory, 2);
    assert_eq!(stats.per_tier.generated, 1);
    assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
}

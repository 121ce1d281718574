//! Integration tests for budgeted generation
//!
//! Requests carry explicit 3-dimensional vectors so similarities are exact.

use scent_cache::generation::{BudgetPhase, GenerationOutput, RequestFeatures};
use scent_cache::{CacheEngine, CacheError, CacheSettings, Provenance};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn engine(daily_tokens: u64) -> CacheEngine {
    let settings = CacheSettings::builder()
        .embedding_dimension(3)
        .semantic_similarity_threshold(0.85)
        .daily_token_allowance(daily_tokens)
        .build();

    CacheEngine::builder()
        .settings(settings)
        .maintenance(false)
        .build()
        .unwrap()
}

fn vector(values: [f64; 3]) -> RequestFeatures {
    RequestFeatures::from_vector(values.to_vec())
}

async fn resolve(
    engine: &CacheEngine,
    key: &str,
    features: &RequestFeatures,
    tokens: u64,
    calls: &AtomicUsize,
) -> scent_cache::Result<scent_cache::Resolved> {
    let content = format!("description for {}", key);
    engine
        .resolve_generated(
            key,
            features,
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(GenerationOutput::new(json!(content), tokens))
            },
            |_| json!("template description"),
        )
        .await
}

#[tokio::test]
async fn test_exhausted_budget_uses_template() {
    let engine = engine(100_000);
    engine.set_daily_budget(100);
    let calls = AtomicUsize::new(0);

    let first = resolve(&engine, "desc:1", &vector([1.0, 0.0, 0.0]), 60, &calls)
        .await
        .unwrap();
    assert_eq!(first.provenance, Provenance::Generated);

    // Orthogonal request: no semantic match, and the average estimate (60)
    // would overrun the remaining 40 tokens
    let second = resolve(&engine, "desc:2", &vector([0.0, 1.0, 0.0]), 60, &calls)
        .await
        .unwrap();
    assert_eq!(second.provenance, Provenance::Template);
    assert_eq!(second.content, json!("template description"));

    let status = engine.budget_status();
    assert_eq!(status.tokens_used, 60);
    assert_eq!(status.phase, BudgetPhase::Exhausted);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_explicit_estimate_checked_against_remaining() {
    let engine = engine(100);
    let calls = AtomicUsize::new(0);

    let big = vector([0.0, 0.0, 1.0]).with_estimated_tokens(150);
    let resolved = resolve(&engine, "desc:big", &big, 150, &calls)
        .await
        .unwrap();

    assert_eq!(resolved.provenance, Provenance::Template);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_semantic_hit() {
    let engine = engine(100_000);
    let calls = AtomicUsize::new(0);

    let first = resolve(&engine, "desc:a", &vector([1.0, 0.0, 0.0]), 50, &calls)
        .await
        .unwrap();
    let second = resolve(&engine, "desc:b", &vector([0.99, 0.1, 0.0]), 50, &calls)
        .await
        .unwrap();

    assert_eq!(second.provenance, Provenance::SemanticCache);
    assert_eq!(second.content, first.content);
    assert_eq!(second.matched_key.as_deref(), Some("desc:a"));
    assert!(second.similarity.unwrap() > 0.99);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The semantic answer is now an exact entry of its own
    let third = resolve(&engine, "desc:b", &vector([0.99, 0.1, 0.0]), 50, &calls)
        .await
        .unwrap();
    assert_eq!(third.provenance, Provenance::ExactCache);
}

#[tokio::test]
async fn test_below_threshold_generates() {
    let engine = engine(100_000);
    let calls = AtomicUsize::new(0);

    resolve(&engine, "desc:a", &vector([1.0, 0.0, 0.0]), 10, &calls)
        .await
        .unwrap();
    // cos = 0.5
    let other = resolve(&engine, "desc:b", &vector([0.5, 0.866, 0.0]), 10, &calls)
        .await
        .unwrap();

    assert_eq!(other.provenance, Provenance::Generated);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(engine.generation().semantic_index_len().await, 2);
}

#[tokio::test]
async fn test_exact_hit_does_not_spend_budget() {
    let engine = engine(100_000);
    let calls = AtomicUsize::new(0);
    let features = vector([0.0, 1.0, 0.0]);

    resolve(&engine, "desc:x", &features, 40, &calls).await.unwrap();
    let again = resolve(&engine, "desc:x", &features, 40, &calls).await.unwrap();

    assert_eq!(again.provenance, Provenance::ExactCache);
    assert_eq!(engine.budget_status().tokens_used, 40);
    assert_eq!(engine.budget_status().operations_count, 1);
}

#[tokio::test]
async fn test_templates_are_not_indexed() {
    let engine = engine(0);
    let calls = AtomicUsize::new(0);

    let first = resolve(&engine, "desc:t1", &vector([1.0, 0.0, 0.0]), 10, &calls)
        .await
        .unwrap();
    assert_eq!(first.provenance, Provenance::Template);
    assert_eq!(engine.generation().semantic_index_len().await, 0);

    // Nearly identical request still gets a template, not a semantic hit
    let second = resolve(&engine, "desc:t2", &vector([0.99, 0.1, 0.0]), 10, &calls)
        .await
        .unwrap();
    assert_eq!(second.provenance, Provenance::Template);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // The template itself is cached under its key
    let (cached, _) = engine.get("desc:t1", "generation").await.unwrap();
    assert_eq!(cached, json!("template description"));
}

#[tokio::test]
async fn test_generation_error_propagates() {
    let engine = engine(100_000);

    let err = engine
        .resolve_generated(
            "desc:broken",
            &vector([1.0, 0.0, 0.0]),
            || async { Err(anyhow::anyhow!("rate limited")) },
            |_| json!("template description"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::GenerationFailed { .. }));
    assert!(err.to_string().contains("rate limited"));
    assert_eq!(engine.budget_status().tokens_used, 0);
    assert_eq!(engine.generation().semantic_index_len().await, 0);
    assert!(engine.manager().memory_entry("desc:broken").await.is_none());
}

#[tokio::test]
async fn test_generation_timeout() {
    let settings = CacheSettings::builder()
        .embedding_dimension(3)
        .generation_timeout(Some(Duration::from_millis(20)))
        .build();
    let engine = CacheEngine::builder()
        .settings(settings)
        .maintenance(false)
        .build()
        .unwrap();

    let err = engine
        .resolve_generated(
            "desc:slow",
            &vector([1.0, 0.0, 0.0]),
            || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(GenerationOutput::new("late", 10))
            },
            |_| json!("template description"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CacheError::GenerationTimeout { .. }));
}

#[tokio::test]
async fn test_concurrent_requests_generate_once() {
    let engine = engine(100_000);
    let calls = AtomicUsize::new(0);
    let counter = &calls;
    let features = vector([0.0, 0.0, 1.0]);

    let request = || {
        engine.resolve_generated(
            "desc:hot",
            &features,
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(GenerationOutput::new("shared", 25))
            },
            |_| json!("template description"),
        )
    };

    let (a, b) = tokio::join!(request(), request());
    let mut provenances = vec![a.unwrap().provenance, b.unwrap().provenance];
    provenances.sort_by_key(|p| p.as_str());

    assert_eq!(provenances, vec![Provenance::ExactCache, Provenance::Generated]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(engine.budget_status().tokens_used, 25);
}

#[tokio::test]
async fn test_invalidated_response_leaves_index() {
    let engine = engine(100_000);
    let calls = AtomicUsize::new(0);

    resolve(&engine, "desc:a", &vector([1.0, 0.0, 0.0]), 10, &calls)
        .await
        .unwrap();
    assert!(engine.generation().is_indexed("desc:a").await);

    engine.invalidate("desc:a").await;
    assert!(!engine.generation().is_indexed("desc:a").await);

    let next = resolve(&engine, "desc:b", &vector([0.99, 0.1, 0.0]), 10, &calls)
        .await
        .unwrap();
    assert_eq!(next.provenance, Provenance::Generated);
}

#[tokio::test]
async fn test_reset_reopens_budget() {
    let engine = engine(50);
    let calls = AtomicUsize::new(0);

    resolve(&engine, "desc:1", &vector([1.0, 0.0, 0.0]), 50, &calls)
        .await
        .unwrap();
    assert_eq!(engine.budget_status().phase, BudgetPhase::Exhausted);

    engine.reset_daily_usage();
    let status = engine.budget_status();
    assert_eq!(status.tokens_used, 0);
    assert_eq!(status.phase, BudgetPhase::Open);

    let resolved = resolve(&engine, "desc:2", &vector([0.0, 1.0, 0.0]), 20, &calls)
        .await
        .unwrap();
    assert_eq!(resolved.provenance, Provenance::Generated);
}

#[tokio::test]
async fn test_generation_statistics() {
    let engine = engine(100_000);

    let generate = |key: &'static str, features: RequestFeatures| {
        let engine = &engine;
        async move {
            engine
                .resolve_generated(
                    key,
                    &features,
                    || async { Ok(GenerationOutput::new("text", 500).with_cost(0.5)) },
                    |_| json!("template description"),
                )
                .await
                .unwrap()
        }
    };

    generate("desc:1", vector([1.0, 0.0, 0.0])).await;
    generate("desc:1", vector([1.0, 0.0, 0.0])).await;
    generate("desc:2", vector([0.99, 0.1, 0.0])).await;

    let stats = engine.statistics().generation;
    assert_eq!(stats.requests, 3);
    assert_eq!(stats.generated, 1);
    assert_eq!(stats.exact_cache, 1);
    assert_eq!(stats.semantic_cache, 1);
    assert_eq!(stats.tokens_used, 500);
    assert!((stats.cost_usd - 0.5).abs() < 1e-9);
    assert!((stats.estimated_savings_usd - 1.0).abs() < 1e-9);
    assert!((stats.cost_savings_percent - 66.666).abs() < 0.01);
}

#[tokio::test]
async fn test_each_resolution_is_one_request() {
    let engine = engine(100_000);
    let calls = AtomicUsize::new(0);

    let generated = resolve(&engine, "desc:a", &vector([1.0, 0.0, 0.0]), 10, &calls)
        .await
        .unwrap();
    assert_eq!(generated.provenance, Provenance::Generated);

    let semantic = resolve(&engine, "desc:b", &vector([0.99, 0.1, 0.0]), 10, &calls)
        .await
        .unwrap();
    assert_eq!(semantic.provenance, Provenance::SemanticCache);

    let stats = engine.statistics();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hit_rate, 0.0);

    for key in ["desc:a", "desc:b"] {
        let exact = resolve(&engine, key, &vector([1.0, 0.0, 0.0]), 10, &calls)
            .await
            .unwrap();
        assert_eq!(exact.provenance, Provenance::ExactCache);
    }

    let stats = engine.statistics();
    assert_eq!(stats.total_requests, 4);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.per_tier.memory, 2);
    assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_template_library_fallback() {
    let engine = engine(0);
    let features = RequestFeatures::new()
        .with_trait("woody", 0.9)
        .with_trait("amber", 0.7);

    let resolved = engine
        .resolve_with_templates("desc:lib", &features, || async {
            Ok(GenerationOutput::new("unused", 10))
        })
        .await
        .unwrap();

    assert_eq!(resolved.provenance, Provenance::Template);
    let text = resolved.content.as_str().unwrap();
    assert!(text.contains("woody") && text.contains("amber"));
}

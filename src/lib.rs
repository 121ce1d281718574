//! # Scent Cache (scent-cache)
//!
//! Tiered caching and budgeted content generation for a fragrance
//! personalization service.
//!
//! ## Features
//!
//! - Read-through cache over memory, Redis and Neo4j tiers with write-back
//! - Per-category TTL, capacity and eviction policy (LRU, LFU, TTL)
//! - Single-flight generation on concurrent misses
//! - Periodic expiry sweep and a global memory-pressure valve
//! - Budgeted generation: exact hit, semantic hit, template, or a real
//!   generation within a daily token allowance
//! - Hit/miss, latency and cost statistics
//!
//! ## Tier Chain
//!
//! Reads try the in-process tier first and then each configured backing
//! tier in order. A hit on a slower tier is copied into every faster tier.
//! When every tier misses, the caller's generator runs once and its result
//! is written to all tiers.
//!
//! ```no_run
//! use scent_cache::{CacheEngine, CacheSettings};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     scent_cache::telemetry::init_tracing("scent_cache=info");
//!
//!     let settings = CacheSettings::builder()
//!         .redis_url("redis://127.0.0.1:6379")
//!         .build();
//!     let engine = CacheEngine::from_settings(settings).await?;
//!
//!     let (profile, source) = engine
//!         .get_or_generate("user_profile:42", "user_profile", || async {
//!             Ok(json!({"id": 42, "families": ["woody", "amber"]}))
//!         })
//!         .await?;
//!     println!("profile from {}: {}", source, profile);
//!
//!     println!("{}", engine.statistics());
//!     Ok(())
//! }
//! ```
//!
//! ## Budgeted Generation
//!
//! Description requests are resolved by the cheapest available route. Once
//! the day's token allowance is spent, new requests get a template instead
//! of a paid generation.
//!
//! ```no_run
//! use scent_cache::generation::{GenerationOutput, RequestFeatures};
//! use scent_cache::CacheEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = CacheEngine::from_env().await?;
//!     engine.set_daily_budget(50_000);
//!
//!     let features = RequestFeatures::new()
//!         .with_trait("citrus", 0.8)
//!         .with_trait("fresh", 0.6)
//!         .with_estimated_tokens(300);
//!
//!     let resolved = engine
//!         .resolve_with_templates("description:fragrance-7", &features, || async {
//!             // Call the language model here
//!             Ok(GenerationOutput::new("Bright bergamot over sea salt.", 280))
//!         })
//!         .await?;
//!
//!     println!("{} ({})", resolved.content, resolved.provenance);
//!     println!("budget: {:?}", engine.budget_status());
//!     Ok(())
//! }
//! ```
//!
//! ## Caching a Function
//!
//! ```no_run
//! use scent_cache::{CacheEngine, CacheKeyBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = CacheEngine::builder().build()?;
//!
//!     let recommend = engine.cached(
//!         "recommendations",
//!         |user: &u64| CacheKeyBuilder::new("recommendations").identifier(user).build(),
//!         |user: u64| async move { Ok(vec![format!("fragrance-{}", user % 7)]) },
//!     )?;
//!
//!     let picks: Vec<String> = recommend.call(42).await?;
//!     println!("{:?}", picks);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod engine;
pub mod error;
pub mod generation;
pub mod metrics;
pub mod telemetry;
pub mod tiers;

// Re-export main types for convenience
pub use cache::{
    cached, CacheEntry, CacheKey, CacheKeyBuilder, CacheMetadata, CacheSettings,
    CacheSettingsBuilder, CacheTierManager, CacheValue, CachedFn, CategoryStrategy,
    EvictionPolicy, GlobPattern, HitSource, InvalidationEvent, InvalidationReason,
    MaintenanceReport, Neo4jSettings, Provenance, StrategyRegistry, TierKind,
    GENERATION_CATEGORY,
};
pub use engine::{CacheEngine, CacheEngineBuilder};
pub use error::{CacheError, Result};
pub use generation::{
    BudgetStatus, BudgetTracker, BudgetedGenerationCache, GenerationOutput, RequestFeatures,
    Resolved, TemplateLibrary,
};
pub use metrics::{CacheStatistics, MetricsCollector};
pub use tiers::{InMemoryTierStore, Neo4jTierStore, RedisTierStore, TierStore, TierValue};

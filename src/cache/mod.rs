//! # Tiered Cache
//!
//! A read-through, write-back cache over an ordered chain of tiers: the
//! in-process map, then any remote and durable [`TierStore`]s.
//!
//! ## Features
//!
//! - **Per-category strategies**: TTL, capacity, eviction policy and
//!   persistence, loaded once at startup
//! - **Eviction**: LRU, LFU or soonest-expiry, one victim per write
//! - **Write-back**: a hit on a slower tier fills every faster tier
//! - **Single-flight**: concurrent misses on one key run one generator
//! - **Maintenance**: periodic expiry sweep and a global pressure valve
//! - **Invalidation events**: every in-process removal is broadcast
//!
//! ## Example
//!
//! ```rust
//! use scent_cache::cache::{CacheSettings, CacheTierManager, StrategyRegistry};
//! use scent_cache::TierKind;
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let manager = CacheTierManager::new(StrategyRegistry::defaults(), CacheSettings::default())?;
//!
//! let (value, source) = manager
//!     .get_or_generate("user_profile:42", "user_profile", || async {
//!         Ok(json!({"name": "Ada", "families": ["woody"]}))
//!     })
//!     .await?;
//! assert_eq!(source, TierKind::Generated);
//!
//! let (_, source) = manager.get("user_profile:42", "user_profile").await?;
//! assert_eq!(source, TierKind::Memory);
//! # Ok(())
//! # }
//! ```
//!
//! [`TierStore`]: crate::tiers::TierStore

pub mod config;
pub mod entry;
pub mod eviction;
pub mod flight;
pub mod invalidation;
pub mod manager;
pub mod memory;
pub mod strategy;
pub mod types;
pub mod wrap;

pub use config::{CacheSettings, CacheSettingsBuilder, Neo4jSettings};
pub use entry::{CacheEntry, CacheMetadata};
pub use eviction::{EvictionCandidate, EvictionController};
pub use flight::{Flight, FlightGuard, FlightWaiter, SingleFlight};
pub use invalidation::{GlobPattern, InvalidationEvent, InvalidationReason};
pub use manager::{run_maintenance_loop, CacheTierManager, MaintenanceReport};
pub use memory::{InsertOutcome, MemoryTier};
pub use strategy::{
    CategoryStrategy, EvictionPolicy, StrategyConfig, StrategyRegistry, GENERATION_CATEGORY,
};
pub use types::{CacheKey, CacheValue, HitSource, Provenance, TierKind};
pub use wrap::{cached, CacheKeyBuilder, CachedFn};

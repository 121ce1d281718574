//! Per-category cache strategies
//!
//! Every category referenced by a cache call must have a registered
//! strategy. The registry is built once at startup and never mutated, so
//! lookups of unknown categories are programming errors and fail fast.

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Category used by the budgeted generation cache
pub const GENERATION_CATEGORY: &str = "generation";

/// Algorithm used to pick the victim when a category is over capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Oldest last access
    Lru,

    /// Lowest access count, ties broken by oldest last access
    Lfu,

    /// Soonest to expire
    Ttl,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
            EvictionPolicy::Ttl => write!(f, "ttl"),
        }
    }
}

/// Immutable policy for one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryStrategy {
    /// Time-to-live applied unless a call overrides it
    pub ttl: Duration,

    /// Maximum in-process entries for the category
    pub max_entries: usize,

    /// Victim selection algorithm
    pub eviction_policy: EvictionPolicy,

    /// Whether `set` also writes remote/durable tiers
    pub persist_beyond_memory: bool,
}

impl CategoryStrategy {
    pub fn new(ttl: Duration, max_entries: usize, eviction_policy: EvictionPolicy) -> Self {
        Self {
            ttl,
            max_entries,
            eviction_policy,
            persist_beyond_memory: false,
        }
    }

    /// Also write through to persistent tiers on `set`
    pub fn persistent(mut self) -> Self {
        self.persist_beyond_memory = true;
        self
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(CacheError::InvalidConfig(format!(
                "category '{}': ttl must be greater than 0",
                name
            )));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig(format!(
                "category '{}': maxEntries must be greater than 0",
                name
            )));
        }
        Ok(())
    }
}

/// Wire format of a category strategy in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StrategyConfig {
    pub ttl_seconds: u64,
    pub max_entries: usize,
    pub eviction_policy: EvictionPolicy,
    #[serde(default)]
    pub persist_beyond_memory: bool,
}

impl From<&StrategyConfig> for CategoryStrategy {
    fn from(config: &StrategyConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_seconds),
            max_entries: config.max_entries,
            eviction_policy: config.eviction_policy,
            persist_beyond_memory: config.persist_beyond_memory,
        }
    }
}

/// Static table mapping category names to strategies
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, CategoryStrategy>,
}

impl StrategyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category, replacing any previous strategy of that name
    pub fn with_category(mut self, name: impl Into<String>, strategy: CategoryStrategy) -> Self {
        self.strategies.insert(name.into(), strategy);
        self
    }

    /// Parse a JSON object of `{ "<category>": { ttlSeconds, maxEntries, ... } }`
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, StrategyConfig> = serde_json::from_str(json)
            .map_err(|e| CacheError::InvalidConfig(format!("invalid strategy file: {}", e)))?;

        let registry = Self {
            strategies: raw
                .iter()
                .map(|(name, config)| (name.clone(), CategoryStrategy::from(config)))
                .collect(),
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Load strategies from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            CacheError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Look up the strategy for a category
    pub fn get(&self, category: &str) -> Result<&CategoryStrategy> {
        self.strategies
            .get(category)
            .ok_or_else(|| CacheError::UnknownCategory(category.to_string()))
    }

    /// Fail unless every named category is registered
    pub fn require(&self, categories: &[&str]) -> Result<()> {
        for category in categories {
            self.get(category)?;
        }
        Ok(())
    }

    /// Validate every registered strategy
    pub fn validate(&self) -> Result<()> {
        if self.strategies.is_empty() {
            return Err(CacheError::InvalidConfig(
                "at least one cache category must be registered".to_string(),
            ));
        }
        for (name, strategy) in &self.strategies {
            strategy.validate(name)?;
        }
        Ok(())
    }

    /// Registered category names
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Categories used by the fragrance discovery application
impl StrategyRegistry {
    pub fn defaults() -> Self {
        Self::new()
            // Quiz-derived profiles change rarely within a session
            .with_category(
                "user_profile",
                CategoryStrategy::new(Duration::from_secs(1800), 10_000, EvictionPolicy::Lru)
                    .persistent(),
            )
            .with_category(
                "recommendations",
                CategoryStrategy::new(Duration::from_secs(900), 5_000, EvictionPolicy::Lfu)
                    .persistent(),
            )
            .with_category(
                "descriptions",
                CategoryStrategy::new(Duration::from_secs(24 * 3600), 20_000, EvictionPolicy::Lfu)
                    .persistent(),
            )
            .with_category(
                "similarity",
                CategoryStrategy::new(Duration::from_secs(3600), 10_000, EvictionPolicy::Ttl),
            )
            .with_category(
                GENERATION_CATEGORY,
                CategoryStrategy::new(Duration::from_secs(7 * 24 * 3600), 5_000, EvictionPolicy::Lru)
                    .persistent(),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_category_is_error() {
        let registry = StrategyRegistry::defaults();
        let err = registry.get("perfume_notes").unwrap_err();
        assert!(matches!(err, CacheError::UnknownCategory(ref c) if c == "perfume_notes"));
    }

    #[test]
    fn test_defaults_are_valid() {
        let registry = StrategyRegistry::defaults();
        assert!(registry.validate().is_ok());
        assert!(registry.require(&[GENERATION_CATEGORY, "user_profile"]).is_ok());
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "profile": { "ttlSeconds": 10, "maxEntries": 2, "evictionPolicy": "lru" },
            "recs": { "ttlSeconds": 60, "maxEntries": 100, "evictionPolicy": "lfu", "persistBeyondMemory": true }
        }"#;

        let registry = StrategyRegistry::from_json(json).unwrap();
        let profile = registry.get("profile").unwrap();
        assert_eq!(profile.ttl, Duration::from_secs(10));
        assert_eq!(profile.max_entries, 2);
        assert_eq!(profile.eviction_policy, EvictionPolicy::Lru);
        assert!(!profile.persist_beyond_memory);

        assert!(registry.get("recs").unwrap().persist_beyond_memory);
    }

    #[test]
    fn test_from_json_rejects_bad_policy() {
        let json = r#"{ "p": { "ttlSeconds": 10, "maxEntries": 2, "evictionPolicy": "fifo" } }"#;
        assert!(matches!(
            StrategyRegistry::from_json(json),
            Err(CacheError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validation() {
        let zero_ttl = StrategyRegistry::new().with_category(
            "p",
            CategoryStrategy::new(Duration::ZERO, 10, EvictionPolicy::Lru),
        );
        assert!(zero_ttl.validate().is_err());

        let zero_entries = StrategyRegistry::new().with_category(
            "p",
            CategoryStrategy::new(Duration::from_secs(1), 0, EvictionPolicy::Lru),
        );
        assert!(zero_entries.validate().is_err());

        assert!(StrategyRegistry::new().validate().is_err());
    }

    #[test]
    fn test_eviction_policy_display() {
        assert_eq!(EvictionPolicy::Lru.to_string(), "lru");
        assert_eq!(EvictionPolicy::Lfu.to_string(), "lfu");
        assert_eq!(EvictionPolicy::Ttl.to_string(), "ttl");
    }
}

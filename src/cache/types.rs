//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type - opaque, caller-constructed, unique per semantic identity
pub type CacheKey = String;

/// Cache value type - structured payload stored in every tier
pub type CacheValue = serde_json::Value;

/// Which tier (or mechanism) produced a value returned by the tier manager.
///
/// Ordering follows the tier chain: `Memory` is fastest, `Generated` means
/// every tier missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// In-process map
    Memory,

    /// Remote key-value store
    Remote,

    /// Durable, queryable store
    Durable,

    /// Produced by the caller's generator after a full miss
    Generated,
}

/// Hit source reported by the tier manager
pub type HitSource = TierKind;

impl TierKind {
    /// All kinds, in chain order
    pub const ALL: [TierKind; 4] = [
        TierKind::Memory,
        TierKind::Remote,
        TierKind::Durable,
        TierKind::Generated,
    ];

    /// Stable string name used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Remote => "remote",
            TierKind::Durable => "durable",
            TierKind::Generated => "generated",
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the budgeted generation cache answered a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Exact key hit in the tier chain
    ExactCache,

    /// Near-duplicate found through vector similarity
    SemanticCache,

    /// Budget exhausted, cheap template output was used
    Template,

    /// Real generation was paid for
    Generated,
}

impl Provenance {
    /// Stable string name used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::ExactCache => "exact_cache",
            Provenance::SemanticCache => "semantic_cache",
            Provenance::Template => "template",
            Provenance::Generated => "generated",
        }
    }

    /// True when no generation cost was incurred
    pub fn is_cached(&self) -> bool {
        matches!(self, Provenance::ExactCache | Provenance::SemanticCache)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

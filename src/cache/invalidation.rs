//! Cache invalidation events and glob patterns
//!
//! Every removal from the in-process tier is described by an
//! [`InvalidationEvent`] so that dependent indexes (the semantic matcher)
//! can drop entries paired with the removed keys.

use crate::cache::strategy::EvictionPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry expired based on TTL
    Expired,

    /// Manual invalidation by key
    Manual,

    /// Invalidated by a glob pattern
    PatternMatch { pattern: String },

    /// Evicted because its category exceeded `max_entries`
    Evicted { policy: EvictionPolicy },

    /// Bulk eviction after the global entry ceiling was exceeded
    MemoryPressure,

    /// The whole in-process tier was cleared
    Cleared,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "TTL expired"),
            InvalidationReason::Manual => write!(f, "manual invalidation"),
            InvalidationReason::PatternMatch { pattern } => {
                write!(f, "pattern match: {}", pattern)
            }
            InvalidationReason::Evicted { policy } => write!(f, "{} eviction", policy),
            InvalidationReason::MemoryPressure => write!(f, "memory pressure"),
            InvalidationReason::Cleared => write!(f, "cache cleared"),
        }
    }
}

/// Event for cache invalidation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Unique event id, for correlating log lines across subscribers
    pub id: Uuid,

    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reason,
            timestamp: Utc::now(),
            keys,
        }
    }
}

/// A simple glob where `*` matches any run of characters (including none).
/// The pattern is anchored at both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    raw: String,
    parts: Vec<String>,
}

impl GlobPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let parts = raw.split('*').map(str::to_string).collect();
        Self { raw, parts }
    }

    /// The original pattern text
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Anchored match of the whole key
    pub fn matches(&self, key: &str) -> bool {
        // No wildcard: exact comparison
        if self.parts.len() == 1 {
            return key == self.parts[0];
        }

        let first = &self.parts[0];
        let last = &self.parts[self.parts.len() - 1];
        if key.len() < first.len() + last.len()
            || !key.starts_with(first.as_str())
            || !key.ends_with(last.as_str())
        {
            return false;
        }

        // Middle fragments must appear in order between the prefix and suffix
        let mut rest = &key[first.len()..key.len() - last.len()];
        for part in &self.parts[1..self.parts.len() - 1] {
            if part.is_empty() {
                continue;
            }
            match rest.find(part.as_str()) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
        true
    }

    /// Equivalent Redis `KEYS`/`SCAN MATCH` pattern, with Redis' own
    /// metacharacters escaped
    pub fn to_redis_pattern(&self) -> String {
        self.parts
            .iter()
            .map(|part| {
                let mut escaped = String::with_capacity(part.len());
                for c in part.chars() {
                    if matches!(c, '?' | '[' | ']' | '\\' | '*') {
                        escaped.push('\\');
                    }
                    escaped.push(c);
                }
                escaped
            })
            .collect::<Vec<_>>()
            .join("*")
    }

    /// Equivalent anchored regular expression (Java syntax, for Cypher `=~`)
    pub fn to_regex(&self) -> String {
        let body = self
            .parts
            .iter()
            .map(|part| {
                let mut escaped = String::with_capacity(part.len());
                for c in part.chars() {
                    if "\\.+*?()|[]{}^$".contains(c) {
                        escaped.push('\\');
                    }
                    escaped.push(c);
                }
                escaped
            })
            .collect::<Vec<_>>()
            .join(".*");
        format!("^{}$", body)
    }
}

impl std::fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

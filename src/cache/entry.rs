//! Cache entry management with TTL support

use crate::cache::types::{CacheKey, CacheValue, TierKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shortest lifetime an entry may have; keeps `expires_at > created_at`
const MIN_TTL: Duration = Duration::from_millis(1);

/// A cache entry with TTL and access metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// Category whose strategy governs this entry
    pub category: String,

    /// The cached value
    pub value: CacheValue,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create a new entry that expires `ttl` from now
    pub fn new(
        key: CacheKey,
        category: impl Into<String>,
        value: CacheValue,
        ttl: Duration,
        tier: TierKind,
    ) -> Self {
        Self::new_at(key, category, value, ttl, tier, Utc::now())
    }

    /// Create a new entry as of `now`
    pub fn new_at(
        key: CacheKey,
        category: impl Into<String>,
        value: CacheValue,
        ttl: Duration,
        tier: TierKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            category: category.into(),
            value,
            metadata: CacheMetadata {
                created_at: now,
                accessed_at: now,
                expires_at: expiry_from(now, ttl),
                access_count: 0,
                tier,
            },
        }
    }

    /// An entry is logically absent once `now` passes `expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.metadata.expires_at
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the entry was created
    pub created_at: DateTime<Utc>,

    /// Last access time (for LRU tracking)
    pub accessed_at: DateTime<Utc>,

    /// When the entry expires
    pub expires_at: DateTime<Utc>,

    /// Number of times this entry has been accessed (for LFU tracking)
    pub access_count: u64,

    /// Provenance of the value, not part of its identity
    pub tier: TierKind,
}

/// Time left until `expires_at`, or `None` once it has passed
pub(crate) fn remaining_until(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    if now > expires_at {
        None
    } else {
        (expires_at - now).to_std().ok()
    }
}

/// Compute an expiry instant, never earlier than `now + 1ms`
pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let ttl = ttl.max(MIN_TTL);
    now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::days(365 * 100))
}

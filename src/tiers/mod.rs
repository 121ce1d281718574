//! Slower cache tiers behind the in-process map
//!
//! The tier manager walks an ordered list of [`TierStore`]s after a memory
//! miss. Each adapter reports failures as [`CacheError::BackingStore`]; the
//! manager decides whether to degrade them to misses.
//!
//! [`CacheError::BackingStore`]: crate::error::CacheError::BackingStore

pub mod durable;
pub mod local;
pub mod remote;

pub use durable::Neo4jTierStore;
pub use local::InMemoryTierStore;
pub use remote::RedisTierStore;

use crate::cache::invalidation::GlobPattern;
use crate::cache::types::{CacheValue, TierKind};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A live value read from a backing tier
#[derive(Debug, Clone, PartialEq)]
pub struct TierValue {
    pub value: CacheValue,

    /// Time left before the store expires the value; `None` when the store
    /// holds it without an expiry
    pub remaining: Option<Duration>,
}

impl TierValue {
    pub fn new(value: CacheValue, remaining: Option<Duration>) -> Self {
        Self { value, remaining }
    }

    /// TTL for copying this value into a faster tier, never past its own expiry
    pub fn write_back_ttl(&self, category_ttl: Duration) -> Duration {
        self.remaining
            .map_or(category_ttl, |remaining| remaining.min(category_ttl))
    }
}

/// A remote or durable key-value tier
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Position of this store in the tier chain
    fn kind(&self) -> TierKind;

    /// Read a live value with its remaining lifetime; expired or absent
    /// keys are `Ok(None)`
    async fn read(&self, key: &str) -> Result<Option<TierValue>>;

    /// Write a value that expires after `ttl`
    async fn write(&self, key: &str, value: &CacheValue, ttl: Duration) -> Result<()>;

    /// Delete one key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching the glob, returning the number removed
    async fn delete_matching(&self, pattern: &GlobPattern) -> Result<u64>;

    /// Physically remove expired entries. Stores that expire natively
    /// (Redis) have nothing to do.
    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    /// Check the store is reachable
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Whole milliseconds for a store expiry, never zero
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_millis().min(u128::from(u64::MAX)) as u64;
    if ttl.subsec_nanos() % 1_000_000 > 0 {
        millis + 1
    } else {
        millis.max(1)
    }
}

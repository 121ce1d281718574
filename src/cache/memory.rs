//! In-process tier with per-category capacity and lazy expiry
//!
//! Lookups take the read lock and record access through atomics, so
//! concurrent readers never block each other. Writes, removals and
//! maintenance take the write lock.

use crate::cache::{
    entry::CacheEntry,
    eviction::{EvictionCandidate, EvictionController},
    invalidation::GlobPattern,
    strategy::CategoryStrategy,
    types::{CacheKey, CacheValue},
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Outcome of a write into the memory tier
#[derive(Debug, Default)]
pub struct InsertOutcome {
    /// Key evicted to make room, if the category was full
    pub evicted: Option<CacheKey>,

    /// True when an existing entry was replaced
    pub replaced: bool,
}

/// Access bookkeeping updated under the read lock
#[derive(Debug)]
struct AccessTracker {
    count: AtomicU64,
    last_access_seq: AtomicU64,
    last_access_ms: AtomicI64,
}

impl AccessTracker {
    fn new(seq: u64, now: DateTime<Utc>) -> Self {
        Self {
            count: AtomicU64::new(0),
            last_access_seq: AtomicU64::new(seq),
            last_access_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    fn touch(&self, seq: u64, now: DateTime<Utc>) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.last_access_seq.fetch_max(seq, Ordering::Relaxed);
        self.last_access_ms
            .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
    }
}

struct Slot {
    entry: CacheEntry,
    access: AccessTracker,
}

impl Slot {
    fn candidate(&self) -> EvictionCandidate<'_> {
        EvictionCandidate {
            key: &self.entry.key,
            last_access_seq: self.access.last_access_seq.load(Ordering::Relaxed),
            access_count: self.access.count.load(Ordering::Relaxed),
            expires_at: self.entry.metadata.expires_at,
        }
    }

    fn snapshot(&self) -> CacheEntry {
        let mut entry = self.entry.clone();
        entry.metadata.access_count = self.access.count.load(Ordering::Relaxed);
        let millis = self.access.last_access_ms.load(Ordering::Relaxed);
        if let Some(accessed) = Utc.timestamp_millis_opt(millis).single() {
            entry.metadata.accessed_at = accessed;
        }
        entry
    }
}

/// Internal cache storage
#[derive(Default)]
struct MemoryStore {
    /// Main storage: key -> slot
    slots: HashMap<CacheKey, Slot>,

    /// Keys per category, for capacity checks
    by_category: HashMap<String, HashSet<CacheKey>>,
}

impl MemoryStore {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.slots.remove(key)?;
        if let Some(keys) = self.by_category.get_mut(&slot.entry.category) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_category.remove(&slot.entry.category);
            }
        }
        Some(slot.entry)
    }
}

/// The fastest tier: a process-local map owned by the tier manager
pub struct MemoryTier {
    store: RwLock<MemoryStore>,
    eviction: EvictionController,
    sequence: AtomicU64,
}

impl MemoryTier {
    pub fn new(eviction: EvictionController) -> Self {
        Self {
            store: RwLock::new(MemoryStore::default()),
            eviction,
            sequence: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get a live value, recording the access. Expired entries read as
    /// misses and are left for the sweep.
    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<CacheValue> {
        let store = self.store.read().await;
        let slot = store.slots.get(key)?;

        if slot.entry.is_expired_at(now) {
            debug!("Memory tier entry expired: {}", key);
            return None;
        }

        slot.access.touch(self.next_seq(), now);
        Some(slot.entry.value.clone())
    }

    /// Insert or replace an entry. If the entry's category is already at
    /// `max_entries`, exactly one entry of that category is evicted first.
    pub async fn insert(
        &self,
        entry: CacheEntry,
        strategy: &CategoryStrategy,
        now: DateTime<Utc>,
    ) -> InsertOutcome {
        let seq = self.next_seq();
        let mut store = self.store.write().await;
        let mut outcome = InsertOutcome::default();

        if let Some(slot) = store.slots.get_mut(&entry.key) {
            if slot.entry.category == entry.category {
                debug!("Updating existing memory entry: {}", entry.key);
                slot.entry = entry;
                slot.access.last_access_seq.store(seq, Ordering::Relaxed);
                outcome.replaced = true;
                return outcome;
            }
            // Category changed: re-home the key under the new category
            let key = entry.key.clone();
            store.remove(&key);
            outcome.replaced = true;
        }

        let category_len = store
            .by_category
            .get(&entry.category)
            .map(HashSet::len)
            .unwrap_or(0);

        if category_len >= strategy.max_entries {
            let victim = store.by_category.get(&entry.category).and_then(|keys| {
                let candidates = keys
                    .iter()
                    .filter_map(|k| store.slots.get(k))
                    .map(Slot::candidate);
                self.eviction.select_victim(strategy.eviction_policy, candidates)
            });

            if let Some(victim) = victim {
                debug!(
                    "Evicting {} from '{}' ({} policy)",
                    victim, entry.category, strategy.eviction_policy
                );
                store.remove(&victim);
                outcome.evicted = Some(victim);
            }
        }

        debug!("Inserting memory entry: {}", entry.key);
        store
            .by_category
            .entry(entry.category.clone())
            .or_default()
            .insert(entry.key.clone());
        let key = entry.key.clone();
        store.slots.insert(
            key,
            Slot {
                entry,
                access: AccessTracker::new(seq, now),
            },
        );

        outcome
    }

    /// Remove a specific entry
    pub async fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.store.write().await.remove(key)
    }

    /// Remove every key matching the glob, returning the removed keys
    pub async fn remove_matching(&self, pattern: &GlobPattern) -> Vec<CacheKey> {
        let mut store = self.store.write().await;
        let matching: Vec<CacheKey> = store
            .slots
            .keys()
            .filter(|k| pattern.matches(k))
            .cloned()
            .collect();

        for key in &matching {
            store.remove(key);
        }
        matching
    }

    /// Keys whose entries have expired as of `now`
    pub async fn expired_keys(&self, now: DateTime<Utc>) -> Vec<CacheKey> {
        let store = self.store.read().await;
        store
            .slots
            .values()
            .filter(|slot| slot.entry.is_expired_at(now))
            .map(|slot| slot.entry.key.clone())
            .collect()
    }

    /// Remove the given keys that are still expired as of `now`.
    /// Entries rewritten since the scan are kept.
    pub async fn remove_expired(&self, keys: &[CacheKey], now: DateTime<Utc>) -> Vec<CacheKey> {
        let mut store = self.store.write().await;
        let mut removed = Vec::with_capacity(keys.len());

        for key in keys {
            let expired = store
                .slots
                .get(key)
                .map(|slot| slot.entry.is_expired_at(now))
                .unwrap_or(false);
            if expired {
                store.remove(key);
                removed.push(key.clone());
            }
        }
        removed
    }

    /// Coldest keys to drop when the global ceiling is exceeded
    pub async fn pressure_victims(&self) -> Vec<CacheKey> {
        let store = self.store.read().await;
        self.eviction
            .select_pressure_victims(store.slots.values().map(Slot::candidate))
    }

    /// Remove a batch of keys unconditionally
    pub async fn remove_many(&self, keys: &[CacheKey]) -> Vec<CacheKey> {
        let mut store = self.store.write().await;
        keys.iter()
            .filter(|k| store.remove(k).is_some())
            .cloned()
            .collect()
    }

    /// Snapshot of an entry with current access metadata, expired or not
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        let store = self.store.read().await;
        store.slots.get(key).map(Slot::snapshot)
    }

    /// Remove everything, returning the removed keys
    pub async fn clear(&self) -> Vec<CacheKey> {
        let mut store = self.store.write().await;
        store.by_category.clear();
        store.slots.drain().map(|(k, _)| k).collect()
    }

    pub fn eviction_controller(&self) -> &EvictionController {
        &self.eviction
    }

    /// Get number of entries (including expired ones not yet swept)
    pub async fn len(&self) -> usize {
        self.store.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.slots.is_empty()
    }

    /// Number of entries held for one category
    pub async fn category_len(&self, category: &str) -> usize {
        self.store
            .read()
            .await
            .by_category
            .get(category)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

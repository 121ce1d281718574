//! Victim selection for the in-process tier
//!
//! The controller never touches storage itself: the memory tier hands it a
//! view of candidate entries and removes whatever keys it selects. Recency
//! is tracked with a monotonic access sequence rather than wall-clock time
//! so that entries written within the same clock tick still order strictly.

use crate::cache::strategy::EvictionPolicy;
use chrono::{DateTime, Utc};

/// Read-only view of an entry used to rank eviction candidates
#[derive(Debug, Clone, Copy)]
pub struct EvictionCandidate<'a> {
    pub key: &'a str,

    /// Monotonic sequence number of the last access (higher is more recent)
    pub last_access_seq: u64,

    pub access_count: u64,

    pub expires_at: DateTime<Utc>,
}

/// Enforces per-category capacity and the global memory-pressure ceiling
#[derive(Debug, Clone)]
pub struct EvictionController {
    /// Total in-process entries allowed across all categories
    global_max_entries: usize,

    /// Share of entries removed when the global ceiling is exceeded
    pressure_fraction: f64,
}

impl EvictionController {
    pub fn new(global_max_entries: usize, pressure_fraction: f64) -> Self {
        Self {
            global_max_entries,
            pressure_fraction: pressure_fraction.clamp(0.0, 1.0),
        }
    }

    pub fn global_max_entries(&self) -> usize {
        self.global_max_entries
    }

    /// Pick exactly one entry to evict under `policy`
    pub fn select_victim<'a>(
        &self,
        policy: EvictionPolicy,
        candidates: impl Iterator<Item = EvictionCandidate<'a>>,
    ) -> Option<String> {
        let victim = match policy {
            EvictionPolicy::Lru => candidates.min_by_key(|c| c.last_access_seq),
            EvictionPolicy::Lfu => candidates.min_by_key(|c| (c.access_count, c.last_access_seq)),
            // Smallest `expires_at - now` is the smallest `expires_at`
            EvictionPolicy::Ttl => candidates.min_by_key(|c| (c.expires_at, c.last_access_seq)),
        };
        victim.map(|c| c.key.to_string())
    }

    /// True once the in-process tier holds more than the global ceiling
    pub fn under_pressure(&self, total_entries: usize) -> bool {
        total_entries > self.global_max_entries
    }

    /// Select the coldest entries (lowest access count, then least recent)
    /// to bring the tier back under its ceiling. Removes at least
    /// `pressure_fraction` of the current population.
    pub fn select_pressure_victims<'a>(
        &self,
        candidates: impl Iterator<Item = EvictionCandidate<'a>>,
    ) -> Vec<String> {
        let mut ranked: Vec<EvictionCandidate<'a>> = candidates.collect();
        let total = ranked.len();
        if !self.under_pressure(total) {
            return Vec::new();
        }

        let by_fraction = (total as f64 * self.pressure_fraction).ceil() as usize;
        let to_remove = by_fraction.max(total - self.global_max_entries).min(total);

        ranked.sort_by_key(|c| (c.access_count, c.last_access_seq));
        ranked
            .into_iter()
            .take(to_remove)
            .map(|c| c.key.to_string())
            .collect()
    }
}

impl Default for EvictionController {
    fn default() -> Self {
        Self::new(50_000, 0.20)
    }
}

//! Read-through, write-back orchestration across the tier chain
//!
//! Lookups consult the in-process tier first, then every backing
//! [`TierStore`] in chain order. A hit on a slower tier is copied into every
//! faster tier before returning. A full miss runs the caller's generator
//! (at most once per key at a time) and populates every tier.

use crate::cache::{
    config::CacheSettings,
    entry::CacheEntry,
    eviction::EvictionController,
    flight::{run_generator, Flight, SingleFlight},
    invalidation::{GlobPattern, InvalidationEvent, InvalidationReason},
    memory::MemoryTier,
    strategy::{CategoryStrategy, StrategyRegistry},
    types::{CacheKey, CacheValue, HitSource, TierKind},
};
use crate::error::{CacheError, Result};
use crate::metrics::{CacheStatistics, MetricsCollector};
use crate::tiers::{TierStore, TierValue};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What one maintenance pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Expired entries swept from the in-process tier
    pub expired: usize,

    /// Entries dropped by the pressure valve
    pub pressure_evicted: usize,

    /// Expired entries purged from backing tiers
    pub purged: u64,
}

/// Multi-tier cache with per-category strategies
pub struct CacheTierManager {
    registry: StrategyRegistry,
    memory: MemoryTier,
    tiers: Vec<Arc<dyn TierStore>>,
    metrics: Arc<MetricsCollector>,
    flights: SingleFlight<CacheValue>,
    events: broadcast::Sender<InvalidationEvent>,
    settings: CacheSettings,
}

impl CacheTierManager {
    /// Create a manager with only the in-process tier
    pub fn new(registry: StrategyRegistry, settings: CacheSettings) -> Result<Self> {
        registry.validate()?;
        settings.validate()?;

        let eviction = EvictionController::new(
            settings.global_max_entries,
            settings.pressure_eviction_fraction,
        );
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            registry,
            memory: MemoryTier::new(eviction),
            tiers: Vec::new(),
            metrics: Arc::new(MetricsCollector::new(settings.latency_sample_window)),
            flights: SingleFlight::new(),
            events,
            settings,
        })
    }

    /// Append a backing tier. Tiers are kept in chain order
    /// (remote before durable) whatever order they are added in.
    pub fn with_tier(mut self, tier: Arc<dyn TierStore>) -> Self {
        info!("Registering {} tier", tier.kind());
        self.tiers.push(tier);
        self.tiers.sort_by_key(|t| t.kind());
        self
    }

    /// Share an existing metrics collector
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.metrics.statistics()
    }

    /// Backing tiers in chain order
    pub fn tiers(&self) -> &[Arc<dyn TierStore>] {
        &self.tiers
    }

    /// Kinds of the configured tiers, fastest first
    pub fn tier_kinds(&self) -> Vec<TierKind> {
        std::iter::once(TierKind::Memory)
            .chain(self.tiers.iter().map(|t| t.kind()))
            .collect()
    }

    /// Receive an event for every removal from the in-process tier
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.events.subscribe()
    }

    /// Look a key up across every tier without generating.
    ///
    /// Returns `Ok(None)` on a full miss. Fails only for an unknown category.
    pub async fn lookup(&self, key: &str, category: &str) -> Result<Option<(CacheValue, HitSource)>> {
        let started = Instant::now();
        let strategy = self.registry.get(category)?;

        let hit = self.read_through(key, category, strategy).await;
        match &hit {
            Some((_, source)) => self.metrics.record_hit(*source, started.elapsed()),
            None => self.metrics.record_miss(started.elapsed()),
        }
        Ok(hit)
    }

    /// Read-through like [`lookup`](Self::lookup) without recording a
    /// request. For internal re-checks that belong to a request already
    /// counted.
    pub async fn peek(&self, key: &str, category: &str) -> Result<Option<(CacheValue, HitSource)>> {
        let strategy = self.registry.get(category)?;
        Ok(self.read_through(key, category, strategy).await)
    }

    /// Get a cached value, failing with [`CacheError::MissingGenerator`]
    /// when every tier misses
    pub async fn get(&self, key: &str, category: &str) -> Result<(CacheValue, HitSource)> {
        self.lookup(key, category)
            .await?
            .ok_or_else(|| CacheError::MissingGenerator {
                key: key.to_string(),
            })
    }

    /// Get a cached value, or run `generator` after a full miss and write
    /// its result into every tier.
    ///
    /// Concurrent calls for the same key share one generator run; followers
    /// report [`TierKind::Memory`] as their hit source.
    pub async fn get_or_generate<F, Fut>(
        &self,
        key: &str,
        category: &str,
        generator: F,
    ) -> Result<(CacheValue, HitSource)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<CacheValue>>,
    {
        let started = Instant::now();
        let strategy = self.registry.get(category)?;

        if let Some(hit) = self.read_through(key, category, strategy).await {
            self.metrics.record_hit(hit.1, started.elapsed());
            return Ok(hit);
        }

        loop {
            match self.flights.acquire(key) {
                Flight::Leader(guard) => {
                    // A previous leader may have finished between our miss and now
                    if let Some(value) = self.memory.get(key, Utc::now()).await {
                        guard.complete(Ok(value.clone()));
                        self.metrics.record_hit(TierKind::Memory, started.elapsed());
                        return Ok((value, TierKind::Memory));
                    }

                    debug!("Cache miss on every tier for {}, generating", key);
                    let generated =
                        run_generator(key, self.settings.generation_timeout, generator()).await;

                    return match generated {
                        Ok(value) => {
                            self.populate(key, category, strategy, &value, None, TierKind::Generated, true)
                                .await;
                            guard.complete(Ok(value.clone()));
                            self.metrics.record_hit(TierKind::Generated, started.elapsed());
                            Ok((value, TierKind::Generated))
                        }
                        Err(e) => {
                            guard.complete(Err(e.to_string()));
                            self.metrics.record_miss(started.elapsed());
                            Err(e)
                        }
                    };
                }
                Flight::Follower(waiter) => match waiter.wait().await {
                    Some(Ok(value)) => {
                        debug!("Joined in-flight generation for {}", key);
                        self.metrics.record_hit(TierKind::Memory, started.elapsed());
                        return Ok((value, TierKind::Memory));
                    }
                    Some(Err(message)) => {
                        self.metrics.record_miss(started.elapsed());
                        return Err(CacheError::GenerationFailed {
                            key: key.to_string(),
                            source: anyhow::anyhow!(message),
                        });
                    }
                    // Leader was cancelled; try to lead ourselves
                    None => continue,
                },
            }
        }
    }

    /// Store a value. The in-process tier is always written; backing tiers
    /// only when the category persists beyond memory.
    pub async fn set(
        &self,
        key: &str,
        category: &str,
        value: CacheValue,
        ttl_override: Option<Duration>,
    ) -> Result<()> {
        let strategy = self.registry.get(category)?;
        self.populate(
            key,
            category,
            strategy,
            &value,
            ttl_override,
            TierKind::Memory,
            strategy.persist_beyond_memory,
        )
        .await;
        Ok(())
    }

    /// Remove a key from every tier. Backing-tier failures are logged.
    /// Returns whether the in-process tier held the key.
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.memory.remove(key).await.is_some();
        self.publish(InvalidationReason::Manual, vec![key.to_string()]);

        for tier in &self.tiers {
            if let Err(e) = tier.delete(key).await {
                warn!("Failed to delete {} from {} tier: {}", key, tier.kind(), e);
                self.metrics.record_backing_store_error();
            }
        }

        debug!("Invalidated {}", key);
        removed
    }

    /// Remove every key matching a `*` glob. The in-process tier is updated
    /// before returning; backing tiers are cleaned up in the background.
    /// Returns the number of keys removed from the in-process tier.
    pub async fn invalidate_pattern(&self, glob: &str) -> usize {
        let pattern = GlobPattern::new(glob);
        let removed = self.memory.remove_matching(&pattern).await;
        let count = removed.len();

        if !removed.is_empty() {
            self.publish(
                InvalidationReason::PatternMatch {
                    pattern: glob.to_string(),
                },
                removed,
            );
        }

        if !self.tiers.is_empty() {
            let tiers = self.tiers.clone();
            let metrics = Arc::clone(&self.metrics);
            tokio::spawn(async move {
                for tier in tiers {
                    match tier.delete_matching(&pattern).await {
                        Ok(n) => debug!("Removed {} keys matching {} from {} tier", n, pattern, tier.kind()),
                        Err(e) => {
                            warn!("Pattern delete {} failed on {} tier: {}", pattern, tier.kind(), e);
                            metrics.record_backing_store_error();
                        }
                    }
                }
            });
        }

        info!("Invalidated {} in-process entries matching {}", count, glob);
        count
    }

    /// Drop everything from the in-process tier
    pub async fn clear_memory(&self) -> usize {
        let removed = self.memory.clear().await;
        let count = removed.len();
        if count > 0 {
            self.publish(InvalidationReason::Cleared, removed);
        }
        count
    }

    /// Snapshot of an in-process entry with its access metadata
    pub async fn memory_entry(&self, key: &str) -> Option<CacheEntry> {
        self.memory.entry(key).await
    }

    pub async fn memory_len(&self) -> usize {
        self.memory.len().await
    }

    pub async fn category_len(&self, category: &str) -> usize {
        self.memory.category_len(category).await
    }

    /// Sweep expired entries, run the pressure valve and purge expired
    /// entries from backing tiers. Works in batches, yielding in between.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let batch_size = self.settings.sweep_batch_size;
        let now = Utc::now();

        let expired = self.memory.expired_keys(now).await;
        let mut swept: Vec<CacheKey> = Vec::with_capacity(expired.len());
        for batch in expired.chunks(batch_size) {
            swept.extend(self.memory.remove_expired(batch, now).await);
            tokio::task::yield_now().await;
        }
        report.expired = swept.len();
        if !swept.is_empty() {
            self.metrics.record_expirations(swept.len() as u64);
            self.publish(InvalidationReason::Expired, swept);
        }

        let victims = self.memory.pressure_victims().await;
        if !victims.is_empty() {
            warn!(
                "In-process tier above {} entries, evicting {} coldest",
                self.memory.eviction_controller().global_max_entries(),
                victims.len()
            );
            let mut evicted: Vec<CacheKey> = Vec::with_capacity(victims.len());
            for batch in victims.chunks(batch_size) {
                evicted.extend(self.memory.remove_many(batch).await);
                tokio::task::yield_now().await;
            }
            report.pressure_evicted = evicted.len();
            self.metrics.record_pressure_evictions(evicted.len() as u64);
            self.publish(InvalidationReason::MemoryPressure, evicted);
        }

        for tier in &self.tiers {
            match tier.purge_expired().await {
                Ok(n) => report.purged += n,
                Err(e) => {
                    warn!("Purge failed on {} tier: {}", tier.kind(), e);
                    self.metrics.record_backing_store_error();
                }
            }
        }

        if report != MaintenanceReport::default() {
            debug!("Maintenance pass: {:?}", report);
        }
        report
    }

    /// Spawn [`run_maintenance_loop`] on the current runtime
    pub fn start_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let interval = self.settings.sweep_interval;
        tokio::spawn(run_maintenance_loop(Arc::clone(self), interval))
    }

    /// Consult the memory tier, then each backing tier, writing a slower
    /// hit back into every faster tier
    async fn read_through(
        &self,
        key: &str,
        category: &str,
        strategy: &CategoryStrategy,
    ) -> Option<(CacheValue, HitSource)> {
        if let Some(value) = self.memory.get(key, Utc::now()).await {
            debug!("Memory hit: {}", key);
            return Some((value, TierKind::Memory));
        }

        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.read(key).await {
                Ok(Some(hit)) => {
                    debug!("{} tier hit: {}", tier.kind(), key);
                    self.write_back(key, category, strategy, &hit, index, tier.kind())
                        .await;
                    return Some((hit.value, tier.kind()));
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!("Read of {} from {} tier failed, treating as miss: {}", key, tier.kind(), e);
                    self.metrics.record_backing_store_error();
                }
            }
        }

        None
    }

    /// Copy a value found at `tiers[hit_index]` into memory and every
    /// backing tier before it. Copies expire no later than the source.
    async fn write_back(
        &self,
        key: &str,
        category: &str,
        strategy: &CategoryStrategy,
        hit: &TierValue,
        hit_index: usize,
        source: TierKind,
    ) {
        let ttl = hit.write_back_ttl(strategy.ttl);
        self.insert_memory(key, category, strategy, &hit.value, ttl, source)
            .await;
        self.write_tiers(&self.tiers[..hit_index], key, &hit.value, ttl, false)
            .await;
    }

    /// Write to memory and, when `persist` is set, to every backing tier
    #[allow(clippy::too_many_arguments)]
    async fn populate(
        &self,
        key: &str,
        category: &str,
        strategy: &CategoryStrategy,
        value: &CacheValue,
        ttl_override: Option<Duration>,
        source: TierKind,
        persist: bool,
    ) {
        let ttl = ttl_override.unwrap_or(strategy.ttl);
        self.insert_memory(key, category, strategy, value, ttl, source)
            .await;
        if persist {
            // An explicit TTL is kept exact
            self.write_tiers(&self.tiers, key, value, ttl, ttl_override.is_none())
                .await;
        }
    }

    async fn insert_memory(
        &self,
        key: &str,
        category: &str,
        strategy: &CategoryStrategy,
        value: &CacheValue,
        ttl: Duration,
        source: TierKind,
    ) {
        let now = Utc::now();
        let entry = CacheEntry::new_at(key.to_string(), category, value.clone(), ttl, source, now);
        let outcome = self.memory.insert(entry, strategy, now).await;

        if let Some(victim) = outcome.evicted {
            self.metrics.record_evictions(1);
            self.publish(
                InvalidationReason::Evicted {
                    policy: strategy.eviction_policy,
                },
                vec![victim],
            );
        }
    }

    async fn write_tiers(
        &self,
        tiers: &[Arc<dyn TierStore>],
        key: &str,
        value: &CacheValue,
        ttl: Duration,
        jitter: bool,
    ) {
        for tier in tiers {
            let ttl = if jitter {
                self.settings.persistent_ttl(ttl)
            } else {
                ttl
            };
            if let Err(e) = tier.write(key, value, ttl).await {
                warn!("Write of {} to {} tier failed: {}", key, tier.kind(), e);
                self.metrics.record_backing_store_error();
            }
        }
    }

    fn publish(&self, reason: InvalidationReason, keys: Vec<CacheKey>) {
        // No subscribers is fine
        let _ = self.events.send(InvalidationEvent::new(reason, keys));
    }
}

/// Background task for periodic maintenance
pub async fn run_maintenance_loop(manager: Arc<CacheTierManager>, interval: Duration) {
    info!("Starting cache maintenance task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        let report = manager.run_maintenance().await;
        if report.expired > 0 || report.pressure_evicted > 0 {
            debug!(
                "Maintenance: {} expired, {} pressure-evicted",
                report.expired, report.pressure_evicted
            );
        }
    }
}

//! Process-wide cache engine
//!
//! [`CacheEngine`] is built once at startup and shared by handle. It owns
//! the tier manager, the generation cache and the background maintenance
//! task, which stops when the engine is dropped.

use crate::cache::{
    config::CacheSettings,
    invalidation::InvalidationEvent,
    manager::{CacheTierManager, MaintenanceReport},
    strategy::{StrategyRegistry, GENERATION_CATEGORY},
    types::{CacheKey, CacheValue, HitSource, TierKind},
    wrap::{cached, CachedFn},
};
use crate::error::Result;
use crate::generation::{
    budget::BudgetStatus,
    cache::{BudgetedGenerationCache, GenerationOutput, Resolved},
    features::{FeatureEncoder, RequestFeatures},
    template::TemplateLibrary,
};
use crate::metrics::CacheStatistics;
use crate::tiers::{Neo4jTierStore, RedisTierStore, TierStore};
use futures::future::join_all;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// The cache engine
pub struct CacheEngine {
    manager: Arc<CacheTierManager>,
    generation: BudgetedGenerationCache,
    templates: TemplateLibrary,
    maintenance: Option<JoinHandle<()>>,
}

impl CacheEngine {
    pub fn builder() -> CacheEngineBuilder {
        CacheEngineBuilder::default()
    }

    /// Build an engine from settings, connecting the remote and durable
    /// tiers they describe. A tier that cannot be reached is skipped with
    /// an error log; the engine still starts.
    pub async fn from_settings(settings: CacheSettings) -> Result<Self> {
        settings.validate()?;

        let registry = match &settings.strategies_path {
            Some(path) => {
                info!("Loading category strategies from {}", path.display());
                StrategyRegistry::from_file(path)?
            }
            None => StrategyRegistry::defaults(),
        };

        let mut builder = CacheEngine::builder().registry(registry);

        if let Some(url) = &settings.redis_url {
            match RedisTierStore::connect(url, settings.redis_key_prefix.clone()).await {
                Ok(store) => builder = builder.tier(Arc::new(store)),
                Err(e) => error!("Remote tier unavailable, continuing without it: {}", e),
            }
        }

        if let Some(neo4j) = &settings.neo4j {
            match Neo4jTierStore::connect(neo4j).await {
                Ok(store) => builder = builder.tier(Arc::new(store)),
                Err(e) => error!("Durable tier unavailable, continuing without it: {}", e),
            }
        }

        builder.settings(settings).build()
    }

    /// Load settings from the environment and build the engine
    pub async fn from_env() -> Result<Self> {
        Self::from_settings(CacheSettings::from_env()?).await
    }

    pub fn manager(&self) -> &Arc<CacheTierManager> {
        &self.manager
    }

    pub fn generation(&self) -> &BudgetedGenerationCache {
        &self.generation
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    /// Get a cached value; fails when every tier misses
    pub async fn get(&self, key: &str, category: &str) -> Result<(CacheValue, HitSource)> {
        self.manager.get(key, category).await
    }

    /// Get a cached value, generating and caching it on a full miss
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
        self.manager.get_or_generate(key, category, generator).await
    }

    pub async fn set(
        &self,
        key: &str,
        category: &str,
        value: CacheValue,
        ttl_override: Option<Duration>,
    ) -> Result<()> {
        self.manager.set(key, category, value, ttl_override).await
    }

    pub async fn invalidate(&self, key: &str) -> bool {
        self.manager.invalidate(key).await
    }

    /// Returns the number of in-process entries removed
    pub async fn invalidate_pattern(&self, glob: &str) -> usize {
        self.manager.invalidate_pattern(glob).await
    }

    /// Budgeted generation with a caller-supplied template function
    pub async fn resolve_generated<G, Fut, T>(
        &self,
        key: &str,
        features: &RequestFeatures,
        generator: G,
        template_fn: T,
    ) -> Result<Resolved>
    where
        G: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<GenerationOutput>>,
        T: FnOnce(&RequestFeatures) -> CacheValue,
    {
        self.generation
            .resolve(key, features, generator, template_fn)
            .await
    }

    /// Budgeted generation falling back to the engine's template library
    pub async fn resolve_with_templates<G, Fut>(
        &self,
        key: &str,
        features: &RequestFeatures,
        generator: G,
    ) -> Result<Resolved>
    where
        G: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<GenerationOutput>>,
    {
        let templates = &self.templates;
        self.generation
            .resolve(key, features, generator, |f| templates.render(f))
            .await
    }

    /// Wrap an async operation with caching in `category`
    pub fn cached<A, R, K, Op, Fut>(
        &self,
        category: &str,
        key_fn: K,
        op: Op,
    ) -> Result<CachedFn<A, R, K, Op>>
    where
        K: Fn(&A) -> CacheKey,
        Op: Fn(A) -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
        R: Serialize + DeserializeOwned,
    {
        cached(Arc::clone(&self.manager), category, key_fn, op)
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.manager.statistics()
    }

    pub fn budget_status(&self) -> BudgetStatus {
        self.generation.budget_status()
    }

    pub fn set_daily_budget(&self, tokens: u64) {
        self.generation.set_daily_budget(tokens);
    }

    pub fn reset_daily_usage(&self) {
        self.generation.reset_daily_usage();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.manager.subscribe()
    }

    /// Run one maintenance pass immediately
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.manager.run_maintenance().await
    }

    pub fn is_maintenance_running(&self) -> bool {
        self.maintenance
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Health of every backing tier, in chain order
    pub async fn health_check(&self) -> Vec<(TierKind, bool)> {
        let checks = self.manager.tiers().iter().map(|tier| async move {
            let healthy = match tier.health_check().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    warn!("{} tier health check failed: {}", tier.kind(), e);
                    false
                }
            };
            (tier.kind(), healthy)
        });
        join_all(checks).await
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.take() {
            handle.abort();
        }
    }
}

/// Builder for [`CacheEngine`]
pub struct CacheEngineBuilder {
    settings: CacheSettings,
    registry: Option<StrategyRegistry>,
    tiers: Vec<Arc<dyn TierStore>>,
    encoder: Option<Arc<dyn FeatureEncoder>>,
    templates: Option<TemplateLibrary>,
    maintenance: bool,
}

impl Default for CacheEngineBuilder {
    fn default() -> Self {
        Self {
            settings: CacheSettings::default(),
            registry: None,
            tiers: Vec::new(),
            encoder: None,
            templates: None,
            maintenance: true,
        }
    }
}

impl CacheEngineBuilder {
    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Category strategies; defaults to [`StrategyRegistry::defaults`]
    pub fn registry(mut self, registry: StrategyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Add a remote or durable tier
    pub fn tier(mut self, tier: Arc<dyn TierStore>) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn encoder(mut self, encoder: Arc<dyn FeatureEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn templates(mut self, templates: TemplateLibrary) -> Self {
        self.templates = Some(templates);
        self
    }

    /// Whether to spawn the periodic maintenance task (on by default)
    pub fn maintenance(mut self, enabled: bool) -> Self {
        self.maintenance = enabled;
        self
    }

    /// Build the engine. The maintenance task is spawned on the current
    /// Tokio runtime, if there is one.
    pub fn build(self) -> Result<CacheEngine> {
        let registry = self.registry.unwrap_or_else(StrategyRegistry::defaults);
        registry.require(&[GENERATION_CATEGORY])?;

        let mut manager = CacheTierManager::new(registry, self.settings)?;
        for tier in self.tiers {
            manager = manager.with_tier(tier);
        }
        let manager = Arc::new(manager);

        let mut generation = BudgetedGenerationCache::new(Arc::clone(&manager))?;
        if let Some(encoder) = self.encoder {
            generation = generation.with_encoder(encoder)?;
        }

        let maintenance = if self.maintenance {
            match tokio::runtime::Handle::try_current() {
                Ok(_) => Some(manager.start_maintenance()),
                Err(_) => {
                    warn!("No Tokio runtime, cache maintenance task not started");
                    None
                }
            }
        } else {
            None
        };

        info!("Cache engine started with tiers {:?}", manager.tier_kinds());

        Ok(CacheEngine {
            manager,
            generation,
            templates: self.templates.unwrap_or_default(),
            maintenance,
        })
    }
}

//! Cost-aware cache in front of expensive generation calls
//!
//! Resolution order, each step short-circuiting:
//!
//! 1. exact key hit in the tier chain
//! 2. near-duplicate request found by the [`SemanticMatcher`]
//! 3. template output when the daily budget is exhausted
//! 4. real generation, recorded against the budget and indexed for step 2

use crate::cache::{
    config::CacheSettings,
    flight::{run_generator, Flight, SingleFlight},
    invalidation::InvalidationEvent,
    manager::CacheTierManager,
    strategy::GENERATION_CATEGORY,
    types::{CacheKey, CacheValue, Provenance},
};
use crate::error::{CacheError, Result};
use crate::generation::{
    budget::{BudgetDecision, BudgetStatus, BudgetTracker},
    features::{FeatureEncoder, HashingEncoder, RequestFeatures},
    semantic::SemanticMatcher,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info};

/// What a generator returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub content: CacheValue,
    pub tokens_used: u64,

    /// Cost reported by the provider; priced from tokens when absent
    pub cost_usd: Option<f64>,
}

impl GenerationOutput {
    pub fn new(content: impl Into<CacheValue>, tokens_used: u64) -> Self {
        Self {
            content: content.into(),
            tokens_used,
            cost_usd: None,
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }
}

/// Content plus how it was obtained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolved {
    pub content: CacheValue,
    pub provenance: Provenance,

    /// Similarity of the matched request for a semantic hit
    pub similarity: Option<f64>,

    /// Key whose content answered a semantic hit
    pub matched_key: Option<CacheKey>,
}

impl Resolved {
    fn new(content: CacheValue, provenance: Provenance) -> Self {
        Self {
            content,
            provenance,
            similarity: None,
            matched_key: None,
        }
    }
}

/// Generation cache built on the tier manager's `generation` category
pub struct BudgetedGenerationCache {
    manager: Arc<CacheTierManager>,
    matcher: SemanticMatcher,
    budget: BudgetTracker,
    encoder: Arc<dyn FeatureEncoder>,
    flights: SingleFlight<Resolved>,
    invalidations: Mutex<broadcast::Receiver<InvalidationEvent>>,
    semantic_enabled: bool,
    template_ttl: Duration,
    generation_timeout: Option<Duration>,
}

impl BudgetedGenerationCache {
    /// Build on `manager`, which must have a `generation` category
    pub fn new(manager: Arc<CacheTierManager>) -> Result<Self> {
        let settings: CacheSettings = manager.settings().clone();
        let capacity = manager.registry().get(GENERATION_CATEGORY)?.max_entries;

        let invalidations = Mutex::new(manager.subscribe());

        info!(
            "Generation cache ready (semantic: {}, threshold: {}, daily tokens: {})",
            settings.semantic_enabled,
            settings.semantic_similarity_threshold,
            settings.daily_token_allowance
        );

        Ok(Self {
            matcher: SemanticMatcher::new(
                settings.embedding_dimension,
                settings.semantic_similarity_threshold,
                capacity,
            ),
            budget: BudgetTracker::new(
                settings.daily_token_allowance,
                settings.cost_per_1k_tokens_usd,
            ),
            encoder: Arc::new(HashingEncoder::new(settings.embedding_dimension)),
            flights: SingleFlight::new(),
            invalidations,
            semantic_enabled: settings.semantic_enabled,
            template_ttl: settings.template_ttl,
            generation_timeout: settings.generation_timeout,
            manager,
        })
    }

    /// Replace the default hashing encoder. Its dimension must match the
    /// configured embedding dimension.
    pub fn with_encoder(mut self, encoder: Arc<dyn FeatureEncoder>) -> Result<Self> {
        if encoder.dimension() != self.matcher.dimension() {
            return Err(CacheError::DimensionMismatch {
                expected: self.matcher.dimension(),
                actual: encoder.dimension(),
            });
        }
        self.encoder = encoder;
        Ok(self)
    }

    pub fn manager(&self) -> &Arc<CacheTierManager> {
        &self.manager
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    pub fn budget_status(&self) -> BudgetStatus {
        self.budget.status()
    }

    pub fn set_daily_budget(&self, tokens: u64) {
        self.budget.set_daily_budget(tokens);
    }

    pub fn reset_daily_usage(&self) {
        self.budget.reset_daily_usage();
    }

    /// Number of generated responses available for semantic matching
    pub async fn semantic_index_len(&self) -> usize {
        self.prune_invalidated().await;
        self.matcher.len().await
    }

    pub async fn is_indexed(&self, key: &str) -> bool {
        self.prune_invalidated().await;
        self.matcher.contains(key).await
    }

    /// Produce content for `key` at the lowest available cost.
    ///
    /// `generator` runs only if every cheaper step fails and the budget
    /// allows it; its failure is returned as an error, never replaced by a
    /// template. `template_fn` runs only when the budget is exhausted.
    pub async fn resolve<G, Fut, T>(
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
        self.prune_invalidated().await;

        // The only tier-manager request this resolution records
        if let Some((content, _)) = self.manager.lookup(key, GENERATION_CATEGORY).await? {
            debug!("Exact generation cache hit: {}", key);
            return Ok(self.finish(Resolved::new(content, Provenance::ExactCache)));
        }

        loop {
            match self.flights.acquire(key) {
                Flight::Leader(guard) => {
                    if let Some((content, _)) =
                        self.manager.peek(key, GENERATION_CATEGORY).await?
                    {
                        let resolved = Resolved::new(content, Provenance::ExactCache);
                        guard.complete(Ok(resolved.clone()));
                        return Ok(self.finish(resolved));
                    }

                    let outcome = self
                        .resolve_uncached(key, features, generator, template_fn)
                        .await;
                    return match outcome {
                        Ok(resolved) => {
                            guard.complete(Ok(resolved.clone()));
                            Ok(self.finish(resolved))
                        }
                        Err(e) => {
                            guard.complete(Err(e.to_string()));
                            Err(e)
                        }
                    };
                }
                Flight::Follower(waiter) => match waiter.wait().await {
                    Some(Ok(leader)) => {
                        // The leader's result is now cached under this key
                        let provenance = match leader.provenance {
                            Provenance::Template => Provenance::Template,
                            _ => Provenance::ExactCache,
                        };
                        return Ok(self.finish(Resolved::new(leader.content, provenance)));
                    }
                    Some(Err(message)) => {
                        return Err(CacheError::GenerationFailed {
                            key: key.to_string(),
                            source: anyhow::anyhow!(message),
                        });
                    }
                    None => continue,
                },
            }
        }
    }

    /// Steps 2-4 for a key with no exact hit
    async fn resolve_uncached<G, Fut, T>(
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
        let embedding = if self.semantic_enabled {
            let embedding = self.encoder.encode(features)?;
            if let Some(resolved) = self.semantic_match(key, &embedding).await? {
                return Ok(resolved);
            }
            Some(embedding)
        } else {
            None
        };

        if let BudgetDecision::UseTemplate = self.budget.check(features.estimated_tokens) {
            debug!("Budget exhausted, using template for {}", key);
            let content = template_fn(features);
            self.manager
                .set(
                    key,
                    GENERATION_CATEGORY,
                    content.clone(),
                    Some(self.template_ttl),
                )
                .await?;
            return Ok(Resolved::new(content, Provenance::Template));
        }

        let output = run_generator(key, self.generation_timeout, generator()).await?;
        let cost = self.budget.record_usage(output.tokens_used, output.cost_usd);
        self.manager
            .metrics()
            .record_generation_cost(output.tokens_used, cost);
        debug!(
            "Generated {} ({} tokens, ${:.4})",
            key, output.tokens_used, cost
        );

        self.manager
            .set(key, GENERATION_CATEGORY, output.content.clone(), None)
            .await?;
        if let Some(embedding) = embedding {
            self.matcher.insert(key, embedding).await?;
        }

        Ok(Resolved::new(output.content, Provenance::Generated))
    }

    /// Answer from the nearest previously generated response, backfilling
    /// an exact entry for `key`
    async fn semantic_match(&self, key: &str, embedding: &[f64]) -> Result<Option<Resolved>> {
        let Some(matched) = self.matcher.find_nearest(embedding).await? else {
            return Ok(None);
        };

        match self.manager.peek(&matched.key, GENERATION_CATEGORY).await? {
            Some((content, _)) => {
                debug!(
                    "Semantic hit for {} via {} (similarity {:.3})",
                    key, matched.key, matched.similarity
                );
                self.manager
                    .set(key, GENERATION_CATEGORY, content.clone(), None)
                    .await?;
                Ok(Some(Resolved {
                    content,
                    provenance: Provenance::SemanticCache,
                    similarity: Some(matched.similarity),
                    matched_key: Some(matched.key),
                }))
            }
            None => {
                // Paired entry is gone from every tier
                self.matcher.remove(&matched.key).await;
                Ok(None)
            }
        }
    }

    /// Remove a generated response from every tier and from the index
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.manager.invalidate(key).await;
        self.matcher.remove(key).await;
        removed
    }

    fn finish(&self, resolved: Resolved) -> Resolved {
        self.manager.metrics().record_resolution(resolved.provenance);
        resolved
    }

    /// Drop index entries whose cache entries were removed from memory
    async fn prune_invalidated(&self) {
        let mut removed: Vec<CacheKey> = Vec::new();
        {
            let mut receiver = self
                .invalidations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            loop {
                match receiver.try_recv() {
                    Ok(event) => removed.extend(event.keys),
                    Err(TryRecvError::Lagged(skipped)) => {
                        debug!("Missed {} invalidation events", skipped);
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }

        if !removed.is_empty() {
            let dropped = self.matcher.remove_keys(&removed).await;
            if dropped > 0 {
                debug!("Dropped {} semantic index entries", dropped);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::strategy::{CategoryStrategy, EvictionPolicy, StrategyRegistry};
    use serde_json::json;

    fn cache(max_entries: usize) -> BudgetedGenerationCache {
        let registry = StrategyRegistry::new().with_category(
            GENERATION_CATEGORY,
            CategoryStrategy::new(Duration::from_secs(60), max_entries, EvictionPolicy::Lru),
        );
        let settings = CacheSettings::builder().embedding_dimension(2).build();
        let manager = Arc::new(CacheTierManager::new(registry, settings).unwrap());
        BudgetedGenerationCache::new(manager).unwrap()
    }

    async fn generate(cache: &BudgetedGenerationCache, key: &str, vector: Vec<f64>) -> Resolved {
        let content = format!("content for {}", key);
        cache
            .resolve(
                key,
                &RequestFeatures::from_vector(vector),
                move || async move { Ok(GenerationOutput::new(json!(content), 10)) },
                |_| json!("template"),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_requires_generation_category() {
        let registry = StrategyRegistry::new().with_category(
            "profile",
            CategoryStrategy::new(Duration::from_secs(60), 10, EvictionPolicy::Lru),
        );
        let manager =
            Arc::new(CacheTierManager::new(registry, CacheSettings::default()).unwrap());

        assert!(matches!(
            BudgetedGenerationCache::new(manager),
            Err(CacheError::UnknownCategory(_))
        ));
    }

    #[tokio::test]
    async fn test_encoder_dimension_checked() {
        let result = cache(10).with_encoder(Arc::new(HashingEncoder::new(8)));
        assert!(matches!(result, Err(CacheError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_eviction_prunes_semantic_index() {
        let cache = cache(1);

        generate(&cache, "a", vec![1.0, 0.0]).await;
        assert!(cache.is_indexed("a").await);

        // Capacity 1: writing "b" evicts "a" from memory and from the index
        generate(&cache, "b", vec![0.0, 1.0]).await;
        assert!(!cache.is_indexed("a").await);
        assert!(cache.is_indexed("b").await);
        assert_eq!(cache.semantic_index_len().await, 1);
    }

    #[tokio::test]
    async fn test_invalidate_removes_from_index() {
        let cache = cache(10);
        generate(&cache, "a", vec![1.0, 0.0]).await;

        assert!(cache.invalidate("a").await);
        assert!(!cache.is_indexed("a").await);
    }
}

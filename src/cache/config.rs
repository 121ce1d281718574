//! Configuration for the cache engine

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Connection details for the durable Neo4j tier
#[derive(Clone, Serialize, Deserialize)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for Neo4jSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jSettings")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Process-wide settings for the tier manager, generation cache and
/// maintenance task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Interval between expired-entry sweeps
    pub sweep_interval: Duration,

    /// Entries removed per lock acquisition during maintenance
    pub sweep_batch_size: usize,

    /// Ceiling on in-process entries across all categories
    pub global_max_entries: usize,

    /// Share of entries dropped when the ceiling is exceeded
    pub pressure_eviction_fraction: f64,

    /// Minimum cosine similarity for a semantic hit
    pub semantic_similarity_threshold: f64,

    /// Enable the semantic matching step of the generation cache
    pub semantic_enabled: bool,

    /// Length of feature vectors in the semantic index
    pub embedding_dimension: usize,

    /// Daily generation allowance in tokens
    pub daily_token_allowance: u64,

    /// Cost charged per 1k tokens when a generator does not report cost
    pub cost_per_1k_tokens_usd: f64,

    /// Upper bound on a single generator call
    pub generation_timeout: Option<Duration>,

    /// TTL for template fallback entries, so real generation can replace
    /// them once budget returns
    pub template_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0) for remote/durable writes.
    /// Only ever lengthens the TTL.
    pub persistent_ttl_jitter: f64,

    /// Number of latency samples kept for percentile reporting
    pub latency_sample_window: usize,

    /// Remote tier connection string
    pub redis_url: Option<String>,

    /// Namespace prefix for remote tier keys
    pub redis_key_prefix: String,

    /// Durable tier connection details
    pub neo4j: Option<Neo4jSettings>,

    /// JSON file describing category strategies
    pub strategies_path: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            // Sweep every 5 minutes
            sweep_interval: Duration::from_secs(300),
            sweep_batch_size: 256,
            global_max_entries: 50_000,
            pressure_eviction_fraction: 0.20,
            semantic_similarity_threshold: 0.85,
            semantic_enabled: true,
            embedding_dimension: 64,
            daily_token_allowance: 100_000,
            cost_per_1k_tokens_usd: 0.002,
            generation_timeout: Some(Duration::from_secs(30)),
            template_ttl: Duration::from_secs(3600),
            persistent_ttl_jitter: 0.0,
            latency_sample_window: 1_000,
            redis_url: None,
            redis_key_prefix: "scent:cache:".to_string(),
            neo4j: None,
            strategies_path: None,
        }
    }
}

impl CacheSettings {
    /// Create a new builder for cache settings
    pub fn builder() -> CacheSettingsBuilder {
        CacheSettingsBuilder::default()
    }

    /// Load settings from the environment (and a `.env` file if present)
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let mut settings = Self::default();

        if let Some(url) = env_string("SCENT_CACHE_REDIS_URL") {
            settings.redis_url = Some(url);
        }
        if let Some(prefix) = env_string("SCENT_CACHE_REDIS_PREFIX") {
            settings.redis_key_prefix = prefix;
        }
        if let Some(uri) = env_string("SCENT_CACHE_NEO4J_URI") {
            settings.neo4j = Some(Neo4jSettings {
                uri,
                user: env_string("SCENT_CACHE_NEO4J_USER").unwrap_or_else(|| "neo4j".to_string()),
                password: env_string("SCENT_CACHE_NEO4J_PASSWORD").unwrap_or_default(),
                database: env_string("SCENT_CACHE_NEO4J_DATABASE")
                    .unwrap_or_else(|| "neo4j".to_string()),
            });
        }
        if let Some(tokens) = env_parse("SCENT_CACHE_DAILY_TOKENS")? {
            settings.daily_token_allowance = tokens;
        }
        if let Some(threshold) = env_parse("SCENT_CACHE_SIMILARITY_THRESHOLD")? {
            settings.semantic_similarity_threshold = threshold;
        }
        if let Some(secs) = env_parse("SCENT_CACHE_SWEEP_INTERVAL_SECS")? {
            settings.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(max) = env_parse("SCENT_CACHE_GLOBAL_MAX_ENTRIES")? {
            settings.global_max_entries = max;
        }
        if let Some(secs) = env_parse::<u64>("SCENT_CACHE_GENERATION_TIMEOUT_SECS")? {
            // 0 disables the timeout
            settings.generation_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(path) = env_string("SCENT_CACHE_STRATEGIES") {
            settings.strategies_path = Some(PathBuf::from(path));
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.global_max_entries == 0 {
            return Err(invalid("global_max_entries must be greater than 0"));
        }

        if self.sweep_batch_size == 0 {
            return Err(invalid("sweep_batch_size must be greater than 0"));
        }

        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.pressure_eviction_fraction) {
            return Err(invalid("pressure_eviction_fraction must be between 0.0 and 1.0"));
        }

        if self.semantic_similarity_threshold <= 0.0 || self.semantic_similarity_threshold > 1.0 {
            return Err(invalid(
                "semantic_similarity_threshold must be in (0.0, 1.0]",
            ));
        }

        if self.embedding_dimension == 0 {
            return Err(invalid("embedding_dimension must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.persistent_ttl_jitter) {
            return Err(invalid("persistent_ttl_jitter must be between 0.0 and 1.0"));
        }

        if self.cost_per_1k_tokens_usd < 0.0 {
            return Err(invalid("cost_per_1k_tokens_usd must not be negative"));
        }

        if self.latency_sample_window == 0 {
            return Err(invalid("latency_sample_window must be greater than 0"));
        }

        Ok(())
    }

    /// TTL for a remote/durable write, lengthened by up to
    /// `persistent_ttl_jitter` to spread out expiries across processes
    pub fn persistent_ttl(&self, base: Duration) -> Duration {
        if self.persistent_ttl_jitter == 0.0 {
            return base;
        }

        let base_secs = base.as_secs_f64();
        let jitter = rand::random::<f64>() * base_secs * self.persistent_ttl_jitter;
        Duration::from_secs_f64(base_secs + jitter)
    }
}

fn invalid(message: &str) -> CacheError {
    CacheError::InvalidConfig(message.to_string())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CacheError::InvalidConfig(format!("{}={}: {}", name, raw, e))),
        None => Ok(None),
    }
}

/// Builder for cache settings
#[derive(Debug, Default)]
pub struct CacheSettingsBuilder {
    settings: Option<CacheSettings>,
}

impl CacheSettingsBuilder {
    fn settings(&mut self) -> &mut CacheSettings {
        self.settings.get_or_insert_with(CacheSettings::default)
    }

    /// Set the expired-entry sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.settings().sweep_interval = interval;
        self
    }

    pub fn sweep_batch_size(mut self, size: usize) -> Self {
        self.settings().sweep_batch_size = size;
        self
    }

    /// Set the global in-process entry ceiling
    pub fn global_max_entries(mut self, max: usize) -> Self {
        self.settings().global_max_entries = max;
        self
    }

    pub fn pressure_eviction_fraction(mut self, fraction: f64) -> Self {
        self.settings().pressure_eviction_fraction = fraction;
        self
    }

    /// Set semantic similarity threshold
    pub fn semantic_similarity_threshold(mut self, threshold: f64) -> Self {
        self.settings().semantic_similarity_threshold = threshold;
        self
    }

    pub fn semantic_enabled(mut self, enabled: bool) -> Self {
        self.settings().semantic_enabled = enabled;
        self
    }

    pub fn embedding_dimension(mut self, dimension: usize) -> Self {
        self.settings().embedding_dimension = dimension;
        self
    }

    /// Set the daily generation allowance in tokens
    pub fn daily_token_allowance(mut self, tokens: u64) -> Self {
        self.settings().daily_token_allowance = tokens;
        self
    }

    pub fn cost_per_1k_tokens_usd(mut self, cost: f64) -> Self {
        self.settings().cost_per_1k_tokens_usd = cost;
        self
    }

    /// Bound generator calls; `None` disables the timeout
    pub fn generation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.settings().generation_timeout = timeout;
        self
    }

    pub fn template_ttl(mut self, ttl: Duration) -> Self {
        self.settings().template_ttl = ttl;
        self
    }

    pub fn persistent_ttl_jitter(mut self, jitter: f64) -> Self {
        self.settings().persistent_ttl_jitter = jitter;
        self
    }

    pub fn latency_sample_window(mut self, window: usize) -> Self {
        self.settings().latency_sample_window = window;
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.settings().redis_url = Some(url.into());
        self
    }

    pub fn neo4j(mut self, neo4j: Neo4jSettings) -> Self {
        self.settings().neo4j = Some(neo4j);
        self
    }

    pub fn strategies_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings().strategies_path = Some(path.into());
        self
    }

    /// Build the settings
    pub fn build(self) -> CacheSettings {
        self.settings.unwrap_or_default()
    }
}

/// Preset configurations
impl CacheSettings {
    /// Memory-constrained environments and local development
    pub fn small() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            global_max_entries: 1_000,
            embedding_dimension: 32,
            daily_token_allowance: 10_000,
            latency_sample_window: 200,
            ..Default::default()
        }
    }

    /// Large deployments with a generous generation budget
    pub fn large() -> Self {
        Self {
            sweep_interval: Duration::from_secs(600),
            sweep_batch_size: 1_024,
            global_max_entries: 1_000_000,
            embedding_dimension: 128,
            daily_token_allowance: 5_000_000,
            latency_sample_window: 10_000,
            ..Default::default()
        }
    }
}

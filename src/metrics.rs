//! Hit-rate, latency and cost accounting
//!
//! A single [`MetricsCollector`] is shared by the tier manager and the
//! generation cache. Recording is a short critical section on a plain mutex;
//! summaries are computed on demand by [`MetricsCollector::statistics`].

use crate::cache::types::{Provenance, TierKind};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Hits per tier. `generated` counts full misses resolved by a generator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierHits {
    pub memory: u64,
    pub remote: u64,
    pub durable: u64,
    pub generated: u64,
}

impl TierHits {
    pub fn get(&self, tier: TierKind) -> u64 {
        match tier {
            TierKind::Memory => self.memory,
            TierKind::Remote => self.remote,
            TierKind::Durable => self.durable,
            TierKind::Generated => self.generated,
        }
    }

    fn slot(&mut self, tier: TierKind) -> &mut u64 {
        match tier {
            TierKind::Memory => &mut self.memory,
            TierKind::Remote => &mut self.remote,
            TierKind::Durable => &mut self.durable,
            TierKind::Generated => &mut self.generated,
        }
    }

    /// Hits served by any cache tier
    pub fn cached(&self) -> u64 {
        self.memory + self.remote + self.durable
    }
}

/// Outcome counts and cost of the budgeted generation cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStatistics {
    pub requests: u64,
    pub exact_cache: u64,
    pub semantic_cache: u64,
    pub template: u64,
    pub generated: u64,

    /// Tokens consumed by real generation
    pub tokens_used: u64,

    /// Money spent on real generation
    pub cost_usd: f64,

    /// Money not spent because a request was answered without generating,
    /// priced at the average cost of a real generation
    pub estimated_savings_usd: f64,

    /// Savings as a share of what every request would have cost (0-100)
    pub cost_savings_percent: f64,
}

/// Point-in-time summary of cache behavior
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Tier manager lookups, hits and misses alike
    pub total_requests: u64,

    pub hits: u64,

    /// Lookups that missed every tier
    pub misses: u64,

    /// Hits as a percentage of requests
    pub hit_rate: f64,

    pub avg_response_time_ms: f64,
    pub p95_response_time_ms: f64,

    pub per_tier: TierHits,

    /// Capacity evictions from the in-process tier
    pub evictions: u64,

    /// Entries removed by the expiry sweep
    pub expirations: u64,

    /// Entries removed by the pressure valve
    pub pressure_evictions: u64,

    /// Failed reads/writes/deletes on remote or durable tiers
    pub backing_store_errors: u64,

    pub generation: GenerationStatistics,
}

impl CacheStatistics {
    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            100.0 - self.hit_rate
        }
    }
}

impl fmt::Display for CacheStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStatistics {{ requests: {}, hit_rate: {:.2}%, avg: {:.2}ms, p95: {:.2}ms, \
             memory: {}, remote: {}, durable: {}, generated: {}, evictions: {}, \
             generation_savings: {:.2}% }}",
            self.total_requests,
            self.hit_rate,
            self.avg_response_time_ms,
            self.p95_response_time_ms,
            self.per_tier.memory,
            self.per_tier.remote,
            self.per_tier.durable,
            self.per_tier.generated,
            self.evictions,
            self.generation.cost_savings_percent,
        )
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    misses: u64,
    per_tier: TierHits,
    latencies_ms: VecDeque<f64>,
    cumulative_latency_ms: f64,
    evictions: u64,
    expirations: u64,
    pressure_evictions: u64,
    backing_store_errors: u64,
    generation: GenerationStatistics,
}

/// Process-wide metrics sink
#[derive(Debug)]
pub struct MetricsCollector {
    state: Mutex<MetricsState>,
    sample_window: usize,
}

impl MetricsCollector {
    /// Keep the latest `sample_window` latency samples for percentiles
    pub fn new(sample_window: usize) -> Self {
        Self {
            state: Mutex::new(MetricsState::default()),
            sample_window: sample_window.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A lookup answered by `tier` (`Generated` for a full miss resolved by
    /// a generator)
    pub fn record_hit(&self, tier: TierKind, latency: Duration) {
        let mut state = self.lock();
        state.total_requests += 1;
        *state.per_tier.slot(tier) += 1;
        if tier == TierKind::Generated {
            state.misses += 1;
        }
        self.push_latency(&mut state, latency);
    }

    /// A lookup that missed every tier and had nothing to fall back on
    pub fn record_miss(&self, latency: Duration) {
        let mut state = self.lock();
        state.total_requests += 1;
        state.misses += 1;
        self.push_latency(&mut state, latency);
    }

    pub fn record_evictions(&self, count: u64) {
        self.lock().evictions += count;
    }

    pub fn record_expirations(&self, count: u64) {
        self.lock().expirations += count;
    }

    pub fn record_pressure_evictions(&self, count: u64) {
        self.lock().pressure_evictions += count;
    }

    pub fn record_backing_store_error(&self) {
        self.lock().backing_store_errors += 1;
    }

    /// How the generation cache answered one request
    pub fn record_resolution(&self, provenance: Provenance) {
        let mut state = self.lock();
        let generation = &mut state.generation;
        generation.requests += 1;
        match provenance {
            Provenance::ExactCache => generation.exact_cache += 1,
            Provenance::SemanticCache => generation.semantic_cache += 1,
            Provenance::Template => generation.template += 1,
            Provenance::Generated => generation.generated += 1,
        }
    }

    /// Usage reported by a successful generation
    pub fn record_generation_cost(&self, tokens: u64, cost_usd: f64) {
        let mut state = self.lock();
        state.generation.tokens_used += tokens;
        state.generation.cost_usd += cost_usd;
    }

    fn push_latency(&self, state: &mut MetricsState, latency: Duration) {
        let ms = latency.as_secs_f64() * 1000.0;
        state.cumulative_latency_ms += ms;
        state.latencies_ms.push_back(ms);
        while state.latencies_ms.len() > self.sample_window {
            state.latencies_ms.pop_front();
        }
    }

    /// Summarize everything recorded so far
    pub fn statistics(&self) -> CacheStatistics {
        let state = self.lock();

        let hits = state.per_tier.cached();
        let hit_rate = if state.total_requests == 0 {
            0.0
        } else {
            hits as f64 / state.total_requests as f64 * 100.0
        };
        let avg_response_time_ms = if state.total_requests == 0 {
            0.0
        } else {
            state.cumulative_latency_ms / state.total_requests as f64
        };

        let mut generation = state.generation.clone();
        let avoided = generation.exact_cache + generation.semantic_cache + generation.template;
        let avg_generation_cost = if generation.generated == 0 {
            0.0
        } else {
            generation.cost_usd / generation.generated as f64
        };
        generation.estimated_savings_usd = avoided as f64 * avg_generation_cost;
        let would_have_cost = generation.estimated_savings_usd + generation.cost_usd;
        generation.cost_savings_percent = if would_have_cost > 0.0 {
            generation.estimated_savings_usd / would_have_cost * 100.0
        } else {
            0.0
        };

        CacheStatistics {
            total_requests: state.total_requests,
            hits,
            misses: state.misses,
            hit_rate,
            avg_response_time_ms,
            p95_response_time_ms: percentile(&state.latencies_ms, 0.95),
            per_tier: state.per_tier,
            evictions: state.evictions,
            expirations: state.expirations,
            pressure_evictions: state.pressure_evictions,
            backing_store_errors: state.backing_store_errors,
            generation,
        }
    }

    /// Forget everything recorded so far
    pub fn reset(&self) {
        *self.lock() = MetricsState::default();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1_000)
    }
}

/// Nearest-rank percentile of the samples
fn percentile(samples: &VecDeque<f64>, quantile: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (quantile * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

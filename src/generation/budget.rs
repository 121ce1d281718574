//! Daily generation allowance
//!
//! The tracker is either `Open` (generation permitted) or `Exhausted`
//! (template and cache only). It becomes `Exhausted` when a prospective
//! generation would overrun the allowance and reopens only on a new UTC day
//! or an explicit reset.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPhase {
    Open,
    Exhausted,
}

impl fmt::Display for BudgetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetPhase::Open => write!(f, "open"),
            BudgetPhase::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Usage for one UTC day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub day_key: NaiveDate,
    pub tokens_used: u64,
    pub token_allowance: u64,
    pub operations_count: u64,
    pub cost_accumulated_usd: f64,
    pub phase: BudgetPhase,
}

impl BudgetState {
    fn new(day_key: NaiveDate, token_allowance: u64) -> Self {
        Self {
            day_key,
            tokens_used: 0,
            token_allowance,
            operations_count: 0,
            cost_accumulated_usd: 0.0,
            phase: BudgetPhase::Open,
        }
    }

    /// Average tokens per recorded generation today
    fn average_tokens(&self) -> u64 {
        if self.operations_count == 0 {
            0
        } else {
            self.tokens_used / self.operations_count
        }
    }
}

/// Read-only view returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub day_key: NaiveDate,
    pub tokens_used: u64,
    pub token_allowance: u64,
    pub remaining_tokens: u64,
    pub cost_usd: f64,
    pub operations_count: u64,
    pub phase: BudgetPhase,
}

impl From<&BudgetState> for BudgetStatus {
    fn from(state: &BudgetState) -> Self {
        Self {
            day_key: state.day_key,
            tokens_used: state.tokens_used,
            token_allowance: state.token_allowance,
            remaining_tokens: state.token_allowance.saturating_sub(state.tokens_used),
            cost_usd: state.cost_accumulated_usd,
            operations_count: state.operations_count,
            phase: state.phase,
        }
    }
}

/// Answer to "may this request be generated?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetDecision {
    /// Generation is affordable; `estimated_tokens` is what was assumed
    Generate { estimated_tokens: u64 },

    /// Allowance exhausted; use the template path
    UseTemplate,
}

/// Process-wide daily budget
#[derive(Debug)]
pub struct BudgetTracker {
    state: Mutex<BudgetState>,
    cost_per_1k_tokens_usd: f64,
}

impl BudgetTracker {
    pub fn new(token_allowance: u64, cost_per_1k_tokens_usd: f64) -> Self {
        Self {
            state: Mutex::new(BudgetState::new(today(), token_allowance)),
            cost_per_1k_tokens_usd,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a generation is affordable today.
    ///
    /// Without an explicit estimate the day's average usage per generation
    /// is assumed (0 before the first generation).
    pub fn check(&self, estimated_tokens: Option<u64>) -> BudgetDecision {
        self.check_at(estimated_tokens, today())
    }

    pub fn check_at(&self, estimated_tokens: Option<u64>, day: NaiveDate) -> BudgetDecision {
        let mut state = self.lock();
        roll_day(&mut state, day);

        if state.phase == BudgetPhase::Exhausted {
            return BudgetDecision::UseTemplate;
        }

        let estimate = estimated_tokens.unwrap_or_else(|| state.average_tokens());
        let exhausted = state.tokens_used >= state.token_allowance
            || state.tokens_used.saturating_add(estimate) > state.token_allowance;

        if exhausted {
            warn!(
                "Generation budget exhausted: {} used + {} estimated > {} allowed",
                state.tokens_used, estimate, state.token_allowance
            );
            state.phase = BudgetPhase::Exhausted;
            return BudgetDecision::UseTemplate;
        }

        BudgetDecision::Generate {
            estimated_tokens: estimate,
        }
    }

    /// Record a successful generation. Returns the cost charged, which is
    /// `cost_usd` if the generator reported one and the token price otherwise.
    pub fn record_usage(&self, tokens: u64, cost_usd: Option<f64>) -> f64 {
        self.record_usage_at(tokens, cost_usd, today())
    }

    pub fn record_usage_at(&self, tokens: u64, cost_usd: Option<f64>, day: NaiveDate) -> f64 {
        let cost = cost_usd.unwrap_or_else(|| self.estimated_cost(tokens));

        let mut state = self.lock();
        roll_day(&mut state, day);
        state.tokens_used = state.tokens_used.saturating_add(tokens);
        state.operations_count += 1;
        state.cost_accumulated_usd += cost;
        if state.tokens_used >= state.token_allowance {
            state.phase = BudgetPhase::Exhausted;
        }
        cost
    }

    /// Price of `tokens` at the configured rate
    pub fn estimated_cost(&self, tokens: u64) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_1k_tokens_usd
    }

    pub fn status(&self) -> BudgetStatus {
        self.status_at(today())
    }

    pub fn status_at(&self, day: NaiveDate) -> BudgetStatus {
        let mut state = self.lock();
        roll_day(&mut state, day);
        BudgetStatus::from(&*state)
    }

    /// Change today's allowance. Raising it above current usage reopens an
    /// exhausted budget; lowering it to or below usage exhausts it.
    pub fn set_daily_budget(&self, tokens: u64) {
        let mut state = self.lock();
        roll_day(&mut state, today());

        state.token_allowance = tokens;
        state.phase = if state.tokens_used < tokens {
            BudgetPhase::Open
        } else {
            BudgetPhase::Exhausted
        };
        info!("Daily generation budget set to {} tokens ({})", tokens, state.phase);
    }

    /// Administrative reset of today's usage
    pub fn reset_daily_usage(&self) {
        let mut state = self.lock();
        let allowance = state.token_allowance;
        *state = BudgetState::new(today(), allowance);
        info!("Daily generation usage reset");
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Start a fresh day if the date moved forward
fn roll_day(state: &mut BudgetState, day: NaiveDate) {
    if day > state.day_key {
        info!(
            "New budget day {} (previous day used {} tokens)",
            day, state.tokens_used
        );
        *state = BudgetState::new(day, state.token_allowance);
    }
}

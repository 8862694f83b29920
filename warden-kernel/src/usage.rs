//! Rate-limit checks and cost estimation.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_services::LlmUsage;

use crate::entry::AgentEntry;

/// Which limit a gate rejection tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitKind {
    /// Requests-per-minute ceiling.
    #[error("requests per minute")]
    Requests,
    /// Tool-calls-per-minute ceiling.
    #[error("tool calls per minute")]
    ToolCalls,
    /// Tokens-per-minute ceiling.
    #[error("tokens per minute")]
    Tokens,
    /// Lifetime cost budget.
    #[error("cost budget")]
    CostBudget,
}

impl RateLimitKind {
    /// Returns the label recorded in audit details.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::ToolCalls => "tool_calls",
            Self::Tokens => "tokens",
            Self::CostBudget => "cost_budget",
        }
    }
}

/// Result of folding post-call usage into an entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    /// Post-call accumulation pushed the window over its token budget.
    pub token_overshoot: bool,
    /// This call crossed the lifetime cost budget.
    pub crossed_budget: bool,
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Rolls the window and consumes one request slot.
///
/// The counter is incremented before provider I/O begins so concurrent
/// tasks cannot all observe spare capacity; callers roll back with
/// [`rollback_request`] when the I/O fails.
///
/// # Errors
///
/// Returns [`RateLimitKind::Requests`] when the window is exhausted; the
/// counter is not incremented in that case.
pub fn consume_request(entry: &mut AgentEntry) -> Result<(), RateLimitKind> {
    entry.roll_windows(now_ms());
    if entry.usage.requests_this_minute >= entry.limits().requests_per_minute {
        return Err(RateLimitKind::Requests);
    }
    entry.usage.requests_this_minute += 1;
    Ok(())
}

/// Rolls the window and consumes one tool-call slot.
///
/// # Errors
///
/// Returns [`RateLimitKind::ToolCalls`] when the window is exhausted.
pub fn consume_tool_call(entry: &mut AgentEntry) -> Result<(), RateLimitKind> {
    entry.roll_windows(now_ms());
    if entry.usage.tool_calls_this_minute >= entry.limits().tool_calls_per_minute {
        return Err(RateLimitKind::ToolCalls);
    }
    entry.usage.tool_calls_this_minute += 1;
    Ok(())
}

/// Returns a request slot consumed by [`consume_request`].
pub fn rollback_request(entry: &mut AgentEntry) {
    entry.usage.requests_this_minute = entry.usage.requests_this_minute.saturating_sub(1);
}

/// Returns a tool-call slot consumed by [`consume_tool_call`].
pub fn rollback_tool_call(entry: &mut AgentEntry) {
    entry.usage.tool_calls_this_minute = entry.usage.tool_calls_this_minute.saturating_sub(1);
}

/// Pre-call token-rate guard.
///
/// Best-effort: tokens are not reserved, so a concurrent burst may
/// overshoot before the first response returns; the overshoot is surfaced
/// by [`apply_usage`] instead of rejecting retroactively.
///
/// # Errors
///
/// Returns [`RateLimitKind::Tokens`] when the window is already full.
pub fn check_token_rate(entry: &mut AgentEntry) -> Result<(), RateLimitKind> {
    entry.roll_windows(now_ms());
    if entry.usage.tokens_this_minute >= entry.limits().tokens_per_minute {
        return Err(RateLimitKind::Tokens);
    }
    Ok(())
}

/// Lifetime cost-budget guard.
///
/// # Errors
///
/// Returns [`RateLimitKind::CostBudget`] when cumulative spend has
/// reached the budget.
pub fn check_cost_budget(entry: &AgentEntry) -> Result<(), RateLimitKind> {
    if entry.cumulative_cost >= entry.limits().cost_budget_usd {
        return Err(RateLimitKind::CostBudget);
    }
    Ok(())
}

/// Folds completed-call usage and cost into the entry.
#[must_use]
pub fn apply_usage(entry: &mut AgentEntry, usage: LlmUsage, cost_usd: f64) -> UsageDelta {
    entry.roll_windows(now_ms());
    let before_budget = entry.cumulative_cost < entry.limits().cost_budget_usd;

    entry.usage.tokens_this_minute += usage.total();
    entry.total_input_tokens += usage.input_tokens;
    entry.total_output_tokens += usage.output_tokens;
    entry.cumulative_cost += cost_usd.max(0.0);
    entry.touch();

    UsageDelta {
        token_overshoot: entry.usage.tokens_this_minute > entry.limits().tokens_per_minute,
        crossed_budget: before_budget
            && entry.cumulative_cost >= entry.limits().cost_budget_usd,
    }
}

/// Per-1k-token pricing for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRate {
    /// USD per 1000 prompt tokens.
    pub input_per_1k: f64,
    /// USD per 1000 completion tokens.
    pub output_per_1k: f64,
}

/// Model pricing table used for cost estimation.
#[derive(Debug, Clone)]
pub struct CostTable {
    rates: HashMap<String, ModelRate>,
    default_rate: ModelRate,
}

impl CostTable {
    /// Creates a table with the supplied fallback rate.
    #[must_use]
    pub fn new(default_rate: ModelRate) -> Self {
        Self {
            rates: HashMap::new(),
            default_rate,
        }
    }

    /// Registers pricing for one model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, rate: ModelRate) -> Self {
        self.rates.insert(model.into(), rate);
        self
    }

    /// Estimates the cost of one call.
    #[must_use]
    pub fn estimate(&self, model: &str, usage: LlmUsage) -> f64 {
        let rate = self.rates.get(model).copied().unwrap_or(self.default_rate);
        (usage.input_tokens as f64 / 1000.0) * rate.input_per_1k
            + (usage.output_tokens as f64 / 1000.0) * rate.output_per_1k
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self::new(ModelRate {
            input_per_1k: 0.001,
            output_per_1k: 0.002,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_primitives::{AgentId, AgentLimits, AgentManifest};

    fn entry(limits: AgentLimits) -> AgentEntry {
        let manifest = AgentManifest::builder("worker")
            .name("Worker")
            .unwrap()
            .version("1.0")
            .unwrap()
            .limits(limits)
            .build()
            .unwrap();
        AgentEntry::new(AgentId::random(), manifest, None)
    }

    #[test]
    fn request_limit_stops_at_ceiling() {
        let mut entry = entry(AgentLimits::default().with_requests_per_minute(2));
        assert!(consume_request(&mut entry).is_ok());
        assert!(consume_request(&mut entry).is_ok());
        let err = consume_request(&mut entry).expect_err("third should trip");
        assert_eq!(err, RateLimitKind::Requests);
        // The rejected request did not consume the counter.
        assert_eq!(entry.usage.requests_this_minute, 2);
    }

    #[test]
    fn rollback_returns_slot() {
        let mut entry = entry(AgentLimits::default().with_requests_per_minute(1));
        consume_request(&mut entry).unwrap();
        rollback_request(&mut entry);
        assert!(consume_request(&mut entry).is_ok());
    }

    #[test]
    fn apply_usage_reports_overshoot_and_budget() {
        let mut entry = entry(
            AgentLimits::default()
                .with_tokens_per_minute(100)
                .with_cost_budget_usd(0.01),
        );
        let delta = apply_usage(
            &mut entry,
            LlmUsage {
                input_tokens: 80,
                output_tokens: 40,
            },
            0.02,
        );
        assert!(delta.token_overshoot);
        assert!(delta.crossed_budget);
        assert!(check_token_rate(&mut entry).is_err());
        assert!(check_cost_budget(&entry).is_err());
    }

    #[test]
    fn cost_table_estimates_per_model() {
        let table = CostTable::default().with_model(
            "sonnet-small",
            ModelRate {
                input_per_1k: 0.003,
                output_per_1k: 0.015,
            },
        );
        let usage = LlmUsage {
            input_tokens: 1000,
            output_tokens: 2000,
        };
        assert!((table.estimate("sonnet-small", usage) - 0.033).abs() < 1e-9);
        assert!((table.estimate("unknown", usage) - 0.005).abs() < 1e-9);
    }
}

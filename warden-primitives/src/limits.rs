//! Per-agent resource limits enforced by the dispatcher gates.

use serde::{Deserialize, Serialize};

/// Resource ceilings applied to a single agent.
///
/// The rate fields feed the sliding usage window; `cost_budget_usd` is
/// checked against cumulative spend over the agent's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentLimits {
    /// Hard cap on tokens requested in a single LLM call.
    pub max_tokens_per_request: u32,
    /// Tokens consumable within one usage window.
    pub tokens_per_minute: u64,
    /// Requests admitted within one usage window.
    pub requests_per_minute: u32,
    /// Tool invocations admitted within one usage window.
    pub tool_calls_per_minute: u32,
    /// Lifetime spend ceiling in USD.
    pub cost_budget_usd: f64,
    /// Memory ceiling for the agent process in MiB.
    pub max_memory_mb: u64,
}

impl AgentLimits {
    /// Replaces the request rate limit.
    #[must_use]
    pub const fn with_requests_per_minute(mut self, limit: u32) -> Self {
        self.requests_per_minute = limit;
        self
    }

    /// Replaces the token rate limit.
    #[must_use]
    pub const fn with_tokens_per_minute(mut self, limit: u64) -> Self {
        self.tokens_per_minute = limit;
        self
    }

    /// Replaces the tool-call rate limit.
    #[must_use]
    pub const fn with_tool_calls_per_minute(mut self, limit: u32) -> Self {
        self.tool_calls_per_minute = limit;
        self
    }

    /// Replaces the lifetime cost budget.
    #[must_use]
    pub const fn with_cost_budget_usd(mut self, budget: f64) -> Self {
        self.cost_budget_usd = budget;
        self
    }
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_tokens_per_request: 4096,
            tokens_per_minute: 100_000,
            requests_per_minute: 60,
            tool_calls_per_minute: 30,
            cost_budget_usd: 10.0,
            max_memory_mb: 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_apply() {
        let limits = AgentLimits::default()
            .with_requests_per_minute(3)
            .with_cost_budget_usd(0.5);
        assert_eq!(limits.requests_per_minute, 3);
        assert!((limits.cost_budget_usd - 0.5).abs() < f64::EPSILON);
        assert_eq!(limits.tool_calls_per_minute, AgentLimits::default().tool_calls_per_minute);
    }
}

//! Per-agent registry entry and sliding usage window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_primitives::{AgentId, AgentLimits, AgentManifest, NodeId, TrustLevel};

use crate::lifecycle::{AgentState, StateError};

const WINDOW_MS: u64 = 60_000;
const ERROR_WINDOW_MS: u64 = 3_600_000;

/// Sliding one-minute counters for rate-limit accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageWindow {
    /// Epoch milliseconds at which the current window opened.
    pub window_start_ms: u64,
    /// Requests admitted in the current window.
    pub requests_this_minute: u32,
    /// Tool invocations admitted in the current window.
    pub tool_calls_this_minute: u32,
    /// Tokens consumed in the current window.
    pub tokens_this_minute: u64,
}

impl UsageWindow {
    /// Resets the window when more than a minute has elapsed.
    pub fn roll(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.window_start_ms) >= WINDOW_MS {
            self.window_start_ms = now_ms;
            self.requests_this_minute = 0;
            self.tool_calls_this_minute = 0;
            self.tokens_this_minute = 0;
        }
    }
}

/// Hourly error-rate counters consumed by the health monitor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorWindow {
    /// Epoch milliseconds at which the current window opened.
    pub window_start_ms: u64,
    /// Tasks completed in the current window.
    pub tasks_this_hour: u32,
    /// Tasks that failed in the current window.
    pub errors_this_hour: u32,
}

impl ErrorWindow {
    fn roll(&mut self, now_ms: u64) {
        if now_ms.saturating_sub(self.window_start_ms) >= ERROR_WINDOW_MS {
            self.window_start_ms = now_ms;
            self.tasks_this_hour = 0;
            self.errors_this_hour = 0;
        }
    }

    /// Error rate over the current window, `0.0` when idle.
    #[must_use]
    pub fn rate(&self) -> f64 {
        if self.tasks_this_hour == 0 {
            0.0
        } else {
            f64::from(self.errors_this_hour) / f64::from(self.tasks_this_hour)
        }
    }
}

/// Mutable registry state for one hosted agent.
///
/// Entries are owned by the registry and mutated only under the per-agent
/// lock; read paths use [`AgentEntry::snapshot`].
#[derive(Debug, Clone)]
pub struct AgentEntry {
    id: AgentId,
    manifest: AgentManifest,
    state: AgentState,
    /// Sliding one-minute rate counters.
    pub usage: UsageWindow,
    /// Hourly error counters.
    pub errors: ErrorWindow,
    /// Lifetime prompt tokens.
    pub total_input_tokens: u64,
    /// Lifetime completion tokens.
    pub total_output_tokens: u64,
    /// Lifetime estimated spend in USD. Monotonically non-decreasing.
    pub cumulative_cost: f64,
    /// Reported memory footprint in MiB.
    pub memory_usage_mb: u64,
    /// Consecutive failed tasks, reset on success.
    pub consecutive_errors: u32,
    node_id: Option<NodeId>,
    created_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl AgentEntry {
    /// Creates an entry in the `Created` state.
    #[must_use]
    pub fn new(id: AgentId, manifest: AgentManifest, node_id: Option<NodeId>) -> Self {
        let now = Utc::now();
        Self {
            id,
            manifest,
            state: AgentState::Created,
            usage: UsageWindow {
                window_start_ms: now.timestamp_millis().max(0) as u64,
                ..UsageWindow::default()
            },
            errors: ErrorWindow::default(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            cumulative_cost: 0.0,
            memory_usage_mb: 0,
            consecutive_errors: 0,
            node_id,
            created_at: now,
            last_active_at: now,
            deleted_at: None,
        }
    }

    /// Returns the internal agent identifier.
    #[must_use]
    pub const fn id(&self) -> AgentId {
        self.id
    }

    /// Returns the human-assigned external identifier.
    #[must_use]
    pub fn external_id(&self) -> &str {
        self.manifest.external_id()
    }

    /// Returns the agent manifest.
    #[must_use]
    pub fn manifest(&self) -> &AgentManifest {
        &self.manifest
    }

    /// Returns the declared trust tier.
    #[must_use]
    pub fn trust_level(&self) -> TrustLevel {
        self.manifest.trust_level()
    }

    /// Returns the declared resource limits.
    #[must_use]
    pub fn limits(&self) -> AgentLimits {
        self.manifest.limits()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> AgentState {
        self.state
    }

    /// Returns the owning cluster node, when configured.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the last activity timestamp.
    #[must_use]
    pub const fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    /// Returns the deletion timestamp, set on termination.
    #[must_use]
    pub const fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    /// Refreshes the last-activity stamp.
    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Applies a lifecycle transition.
    ///
    /// Termination stamps `deleted_at`; every successful transition
    /// refreshes `last_active_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] when the transition is not permitted.
    pub fn transition(&mut self, to: AgentState) -> Result<AgentState, StateError> {
        if !self.state.permits(to) {
            return Err(StateError {
                agent_id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.touch();
        if to == AgentState::Terminated {
            self.deleted_at = Some(Utc::now());
        }
        Ok(self.state)
    }

    /// Rolls both sliding windows to `now_ms`.
    pub fn roll_windows(&mut self, now_ms: u64) {
        self.usage.roll(now_ms);
        self.errors.roll(now_ms);
    }

    /// Records a completed task outcome for error-rate accounting.
    pub fn record_task_outcome(&mut self, success: bool) {
        let now_ms = Utc::now().timestamp_millis().max(0) as u64;
        self.errors.roll(now_ms);
        self.errors.tasks_this_hour += 1;
        if success {
            self.consecutive_errors = 0;
        } else {
            self.errors.errors_this_hour += 1;
            self.consecutive_errors += 1;
        }
    }

    /// Produces an immutable snapshot for read paths.
    #[must_use]
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id,
            external_id: self.external_id().to_owned(),
            name: self.manifest.name().to_owned(),
            state: self.state,
            trust_level: self.trust_level(),
            limits: self.limits(),
            usage: self.usage,
            error_rate: self.errors.rate(),
            total_input_tokens: self.total_input_tokens,
            total_output_tokens: self.total_output_tokens,
            cumulative_cost: self.cumulative_cost,
            memory_usage_mb: self.memory_usage_mb,
            consecutive_errors: self.consecutive_errors,
            node_id: self.node_id.clone(),
            skills: self
                .manifest
                .skills()
                .iter()
                .map(|s| s.id().to_owned())
                .collect(),
            created_at: self.created_at,
            last_active_at: self.last_active_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Immutable view of an entry, safe to hold across suspension points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    /// Internal agent identifier.
    pub id: AgentId,
    /// Human-assigned external identifier.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Lifecycle state.
    pub state: AgentState,
    /// Declared trust tier.
    pub trust_level: TrustLevel,
    /// Declared limits.
    pub limits: AgentLimits,
    /// Usage window at snapshot time.
    pub usage: UsageWindow,
    /// Error rate over the last hour.
    pub error_rate: f64,
    /// Lifetime prompt tokens.
    pub total_input_tokens: u64,
    /// Lifetime completion tokens.
    pub total_output_tokens: u64,
    /// Lifetime estimated spend in USD.
    pub cumulative_cost: f64,
    /// Reported memory footprint in MiB.
    pub memory_usage_mb: u64,
    /// Consecutive failed tasks.
    pub consecutive_errors: u32,
    /// Owning cluster node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Advertised A2A skill ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub last_active_at: DateTime<Utc>,
    /// Deletion timestamp, set on termination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

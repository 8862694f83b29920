//! Cross-agent task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_primitives::{AgentId, TaskId};

/// Lifecycle of a cross-agent task. Transitions are monotone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted and queued.
    Submitted,
    /// Executing under the target agent's identity.
    Working,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
}

impl TaskStatus {
    /// Returns the canonical wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for `completed` and `failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns `true` when `self → next` preserves monotonicity.
    #[must_use]
    pub const fn permits(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Submitted, Self::Working)
                | (Self::Submitted | Self::Working, Self::Completed | Self::Failed)
        )
    }
}

/// One tracked cross-agent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aTask {
    /// Task identifier.
    pub task_id: TaskId,
    /// Delegating agent.
    pub from_agent_id: AgentId,
    /// Executing agent.
    pub to_agent_id: AgentId,
    /// The delegated payload.
    pub payload: Value,
    /// Current status.
    pub status: TaskStatus,
    /// Result, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error message, set on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last transition timestamp.
    pub updated_at: DateTime<Utc>,
}

impl A2aTask {
    /// Creates a task in the `Submitted` state.
    #[must_use]
    pub fn new(from_agent_id: AgentId, to_agent_id: AgentId, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::random(),
            from_agent_id,
            to_agent_id,
            payload,
            status: TaskStatus::Submitted,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_monotone() {
        assert!(TaskStatus::Submitted.permits(TaskStatus::Working));
        assert!(TaskStatus::Working.permits(TaskStatus::Completed));
        assert!(TaskStatus::Working.permits(TaskStatus::Failed));
        assert!(TaskStatus::Submitted.permits(TaskStatus::Failed));

        assert!(!TaskStatus::Completed.permits(TaskStatus::Working));
        assert!(!TaskStatus::Failed.permits(TaskStatus::Completed));
        assert!(!TaskStatus::Working.permits(TaskStatus::Submitted));
    }
}

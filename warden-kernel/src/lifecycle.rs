//! Lifecycle state machine for hosted agents.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use warden_primitives::AgentId;

/// Discrete states an agent can occupy during its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Entry constructed but not yet initializing.
    Created,
    /// Dependencies are being initialized.
    Initializing,
    /// Agent is idle and ready for work.
    Ready,
    /// Agent is actively executing a task.
    Running,
    /// Agent is paused; no tasks are dispatched.
    Paused,
    /// Agent faulted; manual recovery required.
    Error,
    /// Agent fully terminated. Absorbing.
    Terminated,
}

impl AgentState {
    /// Returns the canonical wire label for the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Terminated => "terminated",
        }
    }

    /// Returns `true` once the agent has terminated.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Returns `true` when the dispatcher refuses tasks in this state.
    #[must_use]
    pub const fn refuses_tasks(self) -> bool {
        matches!(self, Self::Terminated | Self::Error | Self::Paused)
    }

    /// Returns `true` when `self → next` is a permitted transition.
    #[must_use]
    pub const fn permits(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Initializing | Self::Terminated)
                | (Self::Initializing, Self::Ready | Self::Error | Self::Terminated)
                | (
                    Self::Ready,
                    Self::Running | Self::Paused | Self::Error | Self::Terminated
                )
                | (
                    Self::Running,
                    Self::Ready | Self::Paused | Self::Error | Self::Terminated
                )
                | (Self::Paused, Self::Ready | Self::Terminated)
                | (Self::Error, Self::Ready | Self::Terminated)
        )
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid lifecycle transition {from:?} -> {to:?} for agent {agent_id}")]
pub struct StateError {
    /// Identifier of the agent whose transition failed.
    pub agent_id: AgentId,
    /// State prior to the attempted transition.
    pub from: AgentState,
    /// Requested target state.
    pub to: AgentState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        assert!(AgentState::Created.permits(AgentState::Initializing));
        assert!(AgentState::Initializing.permits(AgentState::Ready));
        assert!(AgentState::Ready.permits(AgentState::Running));
        assert!(AgentState::Running.permits(AgentState::Ready));
        assert!(AgentState::Running.permits(AgentState::Paused));
        assert!(AgentState::Paused.permits(AgentState::Ready));
        assert!(AgentState::Error.permits(AgentState::Ready));
    }

    #[test]
    fn terminated_is_absorbing() {
        for next in [
            AgentState::Created,
            AgentState::Initializing,
            AgentState::Ready,
            AgentState::Running,
            AgentState::Paused,
            AgentState::Error,
            AgentState::Terminated,
        ] {
            assert!(!AgentState::Terminated.permits(next));
        }
    }

    #[test]
    fn created_cannot_skip_ahead() {
        assert!(!AgentState::Created.permits(AgentState::Ready));
        assert!(!AgentState::Created.permits(AgentState::Running));
        assert!(!AgentState::Paused.permits(AgentState::Running));
    }
}

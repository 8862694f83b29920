//! Agent-to-agent task engine.
//!
//! Cross-agent tasks progress `submitted → working → completed | failed`
//! and never move backwards. Execution runs the target agent's task
//! through the normal dispatcher via the [`TaskExecutor`] seam, so A2A
//! traffic is subject to the same gates as direct traffic, with the
//! caller's identity preserved.

#![warn(missing_docs, clippy::pedantic)]

mod engine;
mod task;

pub use engine::{A2aTaskEngine, TargetProfile, TaskExecutor};
pub use task::{A2aTask, TaskStatus};

use thiserror::Error;

/// Result alias for A2A operations.
pub type A2aResult<T> = Result<T, A2aError>;

/// Errors surfaced by the task engine.
#[derive(Debug, Error)]
pub enum A2aError {
    /// Target agent does not exist.
    #[error("target agent not found")]
    TargetNotFound,

    /// Target agent has terminated.
    #[error("target agent is terminated")]
    TargetTerminated,

    /// Payload exceeded the serialized size cap.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Serialized payload size.
        size: usize,
        /// Configured cap.
        limit: usize,
    },

    /// Payload did not name a skill the target declares.
    #[error("target does not declare skill `{skill}`")]
    UnknownSkill {
        /// The requested skill or type.
        skill: String,
    },

    /// Payload failed the declared skill's input schema.
    #[error("payload rejected by skill `{skill}` input schema: {reason}")]
    SchemaViolation {
        /// The skill whose schema rejected the payload.
        skill: String,
        /// First validation error.
        reason: String,
    },

    /// The requested task does not exist.
    #[error("task not found")]
    TaskNotFound,

    /// A status update would move a task backwards.
    #[error("invalid task status transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// Synchronous dispatch exceeded the caller's timeout.
    #[error("timed out waiting for task completion")]
    Timeout,

    /// Background scheduling failed.
    #[error(transparent)]
    Scheduler(#[from] warden_kernel::SchedulerError),

    /// Internal bookkeeping failure.
    #[error("a2a engine error: {0}")]
    Internal(String),
}

//! Caller-observable error taxonomy.
//!
//! Every error carries a stable `code` and a one-line message; the
//! connection surface frames them as
//! `{status: "error", error: <message>, code}`.

use thiserror::Error;
use warden_governance::SanctionKind;
use warden_kernel::RateLimitKind;

/// Result alias for dispatcher operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors surfaced to task submitters.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Shape or schema rejection.
    #[error("{0}")]
    Validation(String),

    /// No authentication was presented.
    #[error("Authentication required")]
    AuthRequired,

    /// Authentication was presented and rejected.
    #[error("Authentication failed")]
    AuthFailed,

    /// A referenced entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Capability check failed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A policy rule blocked the action.
    #[error("Policy blocked: {0}")]
    PolicyBlocked(String),

    /// The task requires an approval object.
    #[error("Approval required")]
    ApprovalRequired,

    /// A rate limit tripped.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(RateLimitKind),

    /// The lifetime cost budget is exhausted.
    #[error("Cost budget exceeded")]
    BudgetExceeded,

    /// An active sanction gates the agent.
    #[error("Agent sanctioned: {}", .0.as_str())]
    Sanctioned(SanctionKind),

    /// The input sanitizer rejected an LLM message.
    #[error("Input rejected: potential prompt injection detected")]
    InjectionBlocked,

    /// A uniqueness constraint was violated.
    #[error("{0}")]
    Conflict(String),

    /// An external call exceeded its deadline.
    #[error("Operation timed out")]
    Timeout,

    /// An upstream service failed and was not recovered.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Returns the stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::PolicyBlocked(_) => "POLICY_BLOCKED",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::Sanctioned(_) => "SANCTIONED",
            Self::InjectionBlocked => "POLICY_BLOCKED",
            Self::Conflict(_) => "CONFLICT",
            Self::Timeout => "TIMEOUT",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<warden_services::ServiceError> for TaskError {
    fn from(err: warden_services::ServiceError) -> Self {
        match err {
            warden_services::ServiceError::Conflict { reason } => Self::Conflict(reason),
            warden_services::ServiceError::NotFound { what } => Self::NotFound(what),
            warden_services::ServiceError::Backend { reason } => Self::Upstream(reason),
        }
    }
}

impl From<warden_memory::MemoryError> for TaskError {
    fn from(err: warden_memory::MemoryError) -> Self {
        match err {
            warden_memory::MemoryError::InvalidRecord(reason) => {
                Self::Validation(reason.to_owned())
            }
            warden_memory::MemoryError::NotFound => Self::NotFound("memory record".into()),
            warden_memory::MemoryError::Service(err) => err.into(),
        }
    }
}

impl From<warden_tools::ToolError> for TaskError {
    fn from(err: warden_tools::ToolError) -> Self {
        use warden_tools::ToolError;
        match err {
            ToolError::UnknownTool { id } | ToolError::NotAllowed { id } => {
                Self::NotFound(format!("tool `{id}`"))
            }
            ToolError::PermissionDenied { permission } => Self::PermissionDenied(permission),
            ToolError::PolicyBlocked { resource } => Self::PolicyBlocked(resource),
            ToolError::Timeout { .. } => Self::Timeout,
            ToolError::InvalidDefinition { reason } | ToolError::Execution { reason } => {
                Self::Upstream(reason)
            }
            ToolError::DuplicateTool { id } => Self::Conflict(format!("tool `{id}` exists")),
        }
    }
}

impl From<warden_governance::GovernanceError> for TaskError {
    fn from(err: warden_governance::GovernanceError) -> Self {
        match err {
            warden_governance::GovernanceError::Invalid(reason) => {
                Self::Validation(reason.to_owned())
            }
            warden_governance::GovernanceError::NotFound { what } => Self::NotFound(what.into()),
            warden_governance::GovernanceError::Service(err) => err.into(),
        }
    }
}

impl From<warden_capability::CapabilityError> for TaskError {
    fn from(err: warden_capability::CapabilityError) -> Self {
        match err {
            warden_capability::CapabilityError::UnknownToken => {
                Self::NotFound("capability token".into())
            }
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<warden_a2a::A2aError> for TaskError {
    fn from(err: warden_a2a::A2aError) -> Self {
        use warden_a2a::A2aError;
        match err {
            A2aError::TargetNotFound => Self::NotFound("target agent".into()),
            A2aError::TaskNotFound => Self::NotFound("task".into()),
            A2aError::Timeout => Self::Timeout,
            A2aError::TargetTerminated
            | A2aError::PayloadTooLarge { .. }
            | A2aError::UnknownSkill { .. }
            | A2aError::SchemaViolation { .. } => Self::Validation(err.to_string()),
            A2aError::InvalidTransition { .. } | A2aError::Internal(_) | A2aError::Scheduler(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(TaskError::Validation("x".into()).code(), "VALIDATION_ERROR");
        assert_eq!(
            TaskError::RateLimited(RateLimitKind::Requests).code(),
            "RATE_LIMITED"
        );
        assert_eq!(
            TaskError::Sanctioned(SanctionKind::Throttle).to_string(),
            "Agent sanctioned: throttle"
        );
        assert_eq!(
            TaskError::RateLimited(RateLimitKind::Requests).to_string(),
            "Rate limit exceeded: requests per minute"
        );
    }
}

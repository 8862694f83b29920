//! Tool registry and execution for hosted agents.
//!
//! Tools declare the permissions they require; invocation checks the
//! caller's allow-list and capability coverage, consults the policy
//! engine for structural resources, and runs handlers under time and
//! output-size caps. External `mcp:`-prefixed tools route through a
//! transport to their tool server.

#![warn(missing_docs, clippy::pedantic)]

mod builtin;
mod definition;
mod registry;

pub use builtin::{register_builtins, BuiltinOptions, UrlFetcher};
pub use definition::{HandlerFuture, ToolDefinition, ToolHandler, ToolOutcome};
pub use registry::{InvokeCaps, InvokeContext, InvokeRequest, ToolRegistry, ToolServerTransport};

use thiserror::Error;

/// Result alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors produced by tool registration and invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool metadata failed validation.
    #[error("invalid tool definition: {reason}")]
    InvalidDefinition {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Tool id collided with an existing registration.
    #[error("tool `{id}` is already registered")]
    DuplicateTool {
        /// Identifier of the offending tool.
        id: String,
    },

    /// Requested tool does not exist.
    #[error("tool `{id}` is not registered")]
    UnknownTool {
        /// Identifier of the missing tool.
        id: String,
    },

    /// Caller's manifest does not allow the tool or tool server.
    #[error("tool `{id}` is not in the caller's allow-list")]
    NotAllowed {
        /// Identifier of the refused tool.
        id: String,
    },

    /// Caller lacks a required capability.
    #[error("Permission denied: {permission}")]
    PermissionDenied {
        /// The unmet `category.action` requirement.
        permission: String,
    },

    /// A policy rule blocked the structural resource.
    #[error("policy blocked: {resource}")]
    PolicyBlocked {
        /// Label of the blocked resource.
        resource: String,
    },

    /// Execution exceeded the configured time cap.
    #[error("tool `{id}` timed out after {timeout_ms}ms")]
    Timeout {
        /// Identifier of the tool.
        id: String,
        /// The configured cap.
        timeout_ms: u64,
    },

    /// Tool execution failed.
    #[error("tool execution failed: {reason}")]
    Execution {
        /// Human-readable error returned by the implementation.
        reason: String,
    },
}

impl ToolError {
    /// Creates an execution error from the supplied reason.
    #[must_use]
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }
}

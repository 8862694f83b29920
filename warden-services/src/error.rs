//! Shared error type for service interfaces.

use thiserror::Error;

/// Result alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by external service interfaces.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Backend failure (connection, transaction, serialization).
    #[error("service backend error: {reason}")]
    Backend {
        /// Human-readable context provided by the backend.
        reason: String,
    },

    /// A uniqueness constraint was violated.
    #[error("conflict: {reason}")]
    Conflict {
        /// What collided.
        reason: String,
    },

    /// The requested entity does not exist.
    #[error("{what} not found")]
    NotFound {
        /// What was looked up.
        what: String,
    },
}

impl ServiceError {
    /// Convenience helper to construct backend errors.
    #[must_use]
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::Backend {
            reason: reason.into(),
        }
    }

    /// Convenience helper to construct conflict errors.
    #[must_use]
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Convenience helper to construct not-found errors.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

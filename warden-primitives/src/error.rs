//! Shared error definitions for gateway primitives.

use thiserror::Error;
use uuid::Error as UuidError;

/// Result alias used throughout the primitive types.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing primitive types.
#[derive(Debug, Error)]
pub enum Error {
    /// The provided identifier could not be parsed as a UUID.
    #[error("invalid identifier: {source}")]
    InvalidUuid {
        /// Source parsing error from the UUID library.
        #[from]
        source: UuidError,
    },

    /// Node identifier failed validation.
    #[error("invalid node id `{id}`: {reason}")]
    InvalidNodeId {
        /// The offending identifier string.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Agent manifest failed validation.
    #[error("invalid agent manifest: {reason}")]
    InvalidManifest {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A2A skill descriptor failed validation.
    #[error("invalid skill descriptor `{id}`: {reason}")]
    InvalidSkill {
        /// The offending skill identifier.
        id: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Embedding vector failed validation.
    #[error("invalid embedding: {reason}")]
    InvalidEmbedding {
        /// Human-readable reason for rejection.
        reason: &'static str,
    },
}

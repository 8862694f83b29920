//! Capability tokens: signed, time-bounded permission grants.
//!
//! Tokens are credentials held by the gateway on behalf of an agent;
//! checks happen server-side and only the token id surfaces to admins.
//! Signatures are HMAC-SHA-256 over a stable serialization and are always
//! compared in constant time.

#![warn(missing_docs, clippy::pedantic)]

mod permission;
mod store;
mod token;

pub use permission::{Permission, RequiredPermission};
pub use store::{CapabilityStore, GrantRequest};
pub use token::CapabilityToken;

use thiserror::Error;

/// Result alias for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;

/// Errors surfaced by the capability store.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Permission definition failed validation.
    #[error("invalid permission: {reason}")]
    InvalidPermission {
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// A permission string could not be parsed.
    #[error("invalid permission string `{input}`: {reason}")]
    InvalidPermissionString {
        /// The offending input.
        input: String,
        /// Human-readable reason for rejection.
        reason: &'static str,
    },

    /// The requested token does not exist.
    #[error("unknown capability token")]
    UnknownToken,

    /// Resource glob evaluation failed.
    #[error(transparent)]
    Pattern(#[from] warden_policy::PolicyError),
}

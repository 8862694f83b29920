//! Rules-driven policy engine for file, network, shell, and secret access.
//!
//! Rules carry glob matchers and a priority; the highest-priority enabled
//! rule that matches a request decides it, otherwise the set's default
//! decision applies. Strings that look like file paths are normalized
//! before matching and rejected outright when they carry traversal
//! sequences. The crate also hosts the input sanitizer applied to LLM
//! messages and shell-bound tool arguments.

#![warn(missing_docs, clippy::pedantic)]

mod engine;
mod pattern;
mod rules;
mod sanitize;

pub use engine::{Evaluation, PolicyAuditEntry, PolicySet, PolicySetConfig};
pub use pattern::{contains_traversal, looks_like_path, match_pattern, normalize_path};
pub use rules::{
    AccessRequest, FileOperation, PolicyDecision, PolicyRule, RuleKind, RuleMatcher,
};
pub use sanitize::{InputSanitizer, SanitizeContext, SanitizeReport};

use thiserror::Error;

/// Result alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors surfaced by the policy engine.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A glob pattern failed to compile.
    #[error("invalid policy pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Human-readable reason for rejection.
        reason: String,
    },

    /// Rule configuration error.
    #[error("invalid policy rule: {0}")]
    InvalidRule(&'static str),

    /// Too many patterns supplied to a single check.
    #[error("pattern count {count} exceeds the per-check limit of {limit}")]
    PatternLimit {
        /// Number of patterns supplied.
        count: usize,
        /// Configured ceiling.
        limit: usize,
    },

    /// A permissive policy set was requested while production hardening is on.
    #[error("production hardening requires a `block` default decision")]
    PermissiveDefault,
}

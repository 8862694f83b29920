//! Governance loop for the Warden gateway.
//!
//! Every persisted audit record is evaluated against the active
//! governance policies. Violations open moderation cases and apply
//! sanctions, which in turn gate future dispatches. Records produced by
//! the loop itself carry a skip flag and self-owned action prefixes, so
//! governance output is never re-evaluated.

#![warn(missing_docs, clippy::pedantic)]

mod policy;
mod records;
mod review;
mod store;

pub use policy::{GovernancePolicy, GovernanceRule, PolicyStatus, SanctionSpec};
pub use records::{
    Appeal, AppealStatus, CaseStatus, ModerationCase, Sanction, SanctionKind, SanctionStatus,
};
pub use review::{GovernanceLoop, SKIP_PREFIXES};
pub use store::{GovernanceStore, InMemoryGovernanceStore};

use thiserror::Error;

/// Result alias for governance operations.
pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Errors surfaced by governance components.
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A label failed validation.
    #[error("invalid governance input: {0}")]
    Invalid(&'static str),

    /// The requested entity does not exist.
    #[error("{what} not found")]
    NotFound {
        /// What was looked up.
        what: &'static str,
    },

    /// Backing store failure.
    #[error(transparent)]
    Service(#[from] warden_services::ServiceError),
}

//! Memory facade for hosted agents.
//!
//! Three storage kinds — episodic events, semantic facts, and procedural
//! knowledge — behind one stateless facade. Writes optionally generate an
//! embedding and mirror into a vector store; searches fan out across
//! kinds with filters and fall back to text matching when no embedding is
//! available. Enabling memory encryption disables vector search.

#![warn(missing_docs, clippy::pedantic)]

mod facade;
mod kinds;
mod store;

pub use facade::{EpisodeParams, FactParams, MemoryFacade, ProcedureParams};
pub use kinds::{EpisodicEvent, MemoryKind, Procedure, SemanticFact};
pub use store::{InMemoryMemoryStore, MemoryHit, MemoryStore, SearchFilter};

use thiserror::Error;

/// Result alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors surfaced by the memory subsystem.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A record failed validation before storage.
    #[error("invalid memory record: {0}")]
    InvalidRecord(&'static str),

    /// The requested record does not exist.
    #[error("memory record not found")]
    NotFound,

    /// Storage backend failure.
    #[error(transparent)]
    Service(#[from] warden_services::ServiceError),
}

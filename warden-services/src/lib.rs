//! Interfaces to the services the gateway collaborates with.
//!
//! Persistent storage, pub/sub, vector search, embedding generation, and
//! LLM completion are external systems. This crate defines the narrow
//! traits the core consumes and ships in-memory reference implementations
//! used by tests and single-node deployments.

#![warn(missing_docs, clippy::pedantic)]

mod audit;
mod community;
mod directory;
mod embeddings;
mod error;
mod events;
mod llm;
mod usage;
mod vector;

pub use audit::{
    AuditOutcome, AuditQuery, AuditRecord, AuditStore, InMemoryAuditStore, NewAuditRecord,
};
pub use community::{
    CommunityStore, Forum, ForumPost, InMemoryCommunityStore, JobApplication, JobPosting,
    ReputationRecord,
};
pub use directory::{AgentDirectoryRecord, AgentDirectoryStore, InMemoryDirectoryStore};
pub use embeddings::{DeterministicEmbeddingService, DisabledEmbeddingService, EmbeddingService};
pub use error::{ServiceError, ServiceResult};
pub use events::{BroadcastBus, EventBus, GatewayEvent};
pub use llm::{
    ChatMessage, ChatRole, EchoProvider, LlmChunk, LlmProvider, LlmRequest, LlmResponse,
    LlmRouter, LlmUsage,
};
pub use usage::{InMemoryUsageStore, ProviderUsage, UsageStore};
pub use vector::{InMemoryVectorStore, VectorHit, VectorPoint, VectorQuery, VectorStore};

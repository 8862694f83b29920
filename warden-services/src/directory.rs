//! Cluster-wide agent directory.
//!
//! Each gateway node mirrors the agents it owns into the shared directory;
//! discovery reads span all nodes but dispatch never crosses them.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_primitives::{AgentId, NodeId};

use crate::{ServiceError, ServiceResult};

/// Directory projection of one hosted agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDirectoryRecord {
    /// Internal agent identifier.
    pub agent_id: AgentId,
    /// Human-assigned external identifier.
    pub external_id: String,
    /// Display name.
    pub name: String,
    /// Gateway node that owns the agent.
    pub node_id: NodeId,
    /// Lifecycle state label at last sync.
    pub state: String,
    /// Advertised A2A skill ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skills: Vec<String>,
    /// Last sync timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Shared directory of agents across gateway nodes.
#[async_trait]
pub trait AgentDirectoryStore: Send + Sync {
    /// Inserts or replaces the record for an agent.
    async fn upsert(&self, record: AgentDirectoryRecord) -> ServiceResult<()>;

    /// Removes an agent's record.
    async fn remove(&self, agent_id: AgentId) -> ServiceResult<()>;

    /// Returns one agent's record.
    async fn get(&self, agent_id: AgentId) -> ServiceResult<Option<AgentDirectoryRecord>>;

    /// Lists all records, optionally restricted to one node.
    async fn list(&self, node_id: Option<&NodeId>) -> ServiceResult<Vec<AgentDirectoryRecord>>;
}

/// In-memory reference implementation of [`AgentDirectoryStore`].
#[derive(Debug, Default)]
pub struct InMemoryDirectoryStore {
    records: RwLock<HashMap<AgentId, AgentDirectoryRecord>>,
}

impl InMemoryDirectoryStore {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentDirectoryStore for InMemoryDirectoryStore {
    async fn upsert(&self, record: AgentDirectoryRecord) -> ServiceResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ServiceError::backend("directory poisoned"))?;
        records.insert(record.agent_id, record);
        Ok(())
    }

    async fn remove(&self, agent_id: AgentId) -> ServiceResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ServiceError::backend("directory poisoned"))?;
        records.remove(&agent_id);
        Ok(())
    }

    async fn get(&self, agent_id: AgentId) -> ServiceResult<Option<AgentDirectoryRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| ServiceError::backend("directory poisoned"))?;
        Ok(records.get(&agent_id).cloned())
    }

    async fn list(&self, node_id: Option<&NodeId>) -> ServiceResult<Vec<AgentDirectoryRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| ServiceError::backend("directory poisoned"))?;
        let mut listed: Vec<AgentDirectoryRecord> = records
            .values()
            .filter(|record| node_id.is_none_or(|node| &record.node_id == node))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(listed)
    }
}

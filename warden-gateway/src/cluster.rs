//! Cluster fan-out: mirroring owned agents into the shared directory.
//!
//! Each node mirrors only the agents it spawned; discovery reads span
//! all nodes, dispatch never crosses them.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use warden_kernel::{AgentRegistry, AgentState, SchedulerResult, TaskScheduler};
use warden_primitives::{AgentId, NodeId};
use warden_services::{AgentDirectoryRecord, AgentDirectoryStore};

/// Keeps the shared agent directory in step with the local registry.
pub struct ClusterSync {
    registry: Arc<AgentRegistry>,
    directory: Arc<dyn AgentDirectoryStore>,
    node_id: NodeId,
}

impl std::fmt::Debug for ClusterSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterSync")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl ClusterSync {
    /// Creates a sync for this node.
    #[must_use]
    pub fn new(
        registry: Arc<AgentRegistry>,
        directory: Arc<dyn AgentDirectoryStore>,
        node_id: NodeId,
    ) -> Self {
        Self {
            registry,
            directory,
            node_id,
        }
    }

    /// Returns this node's identifier.
    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Mirrors one agent's current snapshot into the directory.
    pub async fn mirror(&self, agent_id: AgentId) {
        let Some(snapshot) = self.registry.snapshot(agent_id) else {
            return;
        };
        let record = AgentDirectoryRecord {
            agent_id: snapshot.id,
            external_id: snapshot.external_id,
            name: snapshot.name,
            node_id: self.node_id.clone(),
            state: snapshot.state.as_str().to_owned(),
            skills: snapshot.skills,
            updated_at: Utc::now(),
        };
        if let Err(err) = self.directory.upsert(record).await {
            warn!(agent_id = %agent_id, error = %err, "directory mirror failed");
        }
    }

    /// Removes one agent from the directory.
    pub async fn remove(&self, agent_id: AgentId) {
        if let Err(err) = self.directory.remove(agent_id).await {
            warn!(agent_id = %agent_id, error = %err, "directory removal failed");
        }
    }

    /// Spawns the mirroring task following registry lifecycle changes.
    ///
    /// # Errors
    ///
    /// Returns a scheduler error when the scheduler is closed.
    pub fn start(self: Arc<Self>, scheduler: &TaskScheduler) -> SchedulerResult<()> {
        let mut changes = self.registry.subscribe();
        scheduler.spawn(async move {
            while let Ok(change) = changes.recv().await {
                debug!(agent_id = %change.agent_id, to = change.to.as_str(), "cluster mirror");
                if change.to == AgentState::Terminated {
                    self.remove(change.agent_id).await;
                } else {
                    self.mirror(change.agent_id).await;
                }
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_primitives::AgentManifest;
    use warden_services::InMemoryDirectoryStore;

    fn manifest(external_id: &str) -> AgentManifest {
        AgentManifest::builder(external_id)
            .name("Worker")
            .unwrap()
            .version("1.0")
            .unwrap()
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn mirror_and_remove_round_trip() {
        let registry = Arc::new(AgentRegistry::new());
        let directory = Arc::new(InMemoryDirectoryStore::new());
        let sync = ClusterSync::new(
            Arc::clone(&registry),
            directory.clone(),
            NodeId::new("node-a").unwrap(),
        );

        let id = registry.admit(manifest("worker-1"), None).unwrap();
        sync.mirror(id).await;
        let record = directory.get(id).await.unwrap().unwrap();
        assert_eq!(record.external_id, "worker-1");
        assert_eq!(record.node_id.as_str(), "node-a");

        sync.remove(id).await;
        assert!(directory.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lifecycle_changes_drive_mirroring() {
        let registry = Arc::new(AgentRegistry::new());
        let directory = Arc::new(InMemoryDirectoryStore::new());
        let sync = Arc::new(ClusterSync::new(
            Arc::clone(&registry),
            directory.clone(),
            NodeId::new("node-a").unwrap(),
        ));
        let scheduler = TaskScheduler::default();
        sync.start(&scheduler).unwrap();

        let id = registry.admit(manifest("worker-1"), None).unwrap();
        registry.transition(id, AgentState::Initializing).unwrap();
        registry.transition(id, AgentState::Ready).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let record = directory.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, "ready");

        registry.transition(id, AgentState::Terminated).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(directory.get(id).await.unwrap().is_none());
    }
}

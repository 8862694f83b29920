//! In-memory registry of hosted agents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};
use warden_primitives::{AgentId, AgentManifest, NodeId};

use crate::entry::{AgentEntry, AgentSnapshot};
use crate::lifecycle::{AgentState, StateError};

const LIFECYCLE_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_REMOVAL_GRACE_SECS: i64 = 30;

/// Result alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors surfaced by the agent registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// External identifier already belongs to a live agent.
    #[error("external id `{external_id}` is already registered")]
    DuplicateExternalId {
        /// The colliding identifier.
        external_id: String,
    },

    /// The requested agent does not exist.
    #[error("agent not found")]
    NotFound,

    /// Lifecycle transition failure.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Lifecycle change broadcast to registry subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleChange {
    /// Agent whose state changed.
    pub agent_id: AgentId,
    /// State before the change.
    pub from: AgentState,
    /// State after the change.
    pub to: AgentState,
}

/// Map of active agents keyed by internal id, with an external-id index.
///
/// Each entry sits behind its own mutex so one agent's gates serialize
/// while different agents progress in parallel; the outer map lock is
/// held only for lookups and membership changes.
pub struct AgentRegistry {
    agents: RwLock<HashMap<AgentId, Arc<Mutex<AgentEntry>>>>,
    by_external: RwLock<HashMap<String, AgentId>>,
    lifecycle: broadcast::Sender<LifecycleChange>,
    removal_grace: Duration,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let agents = self.agents.read().expect("registry poisoned");
        f.debug_struct("AgentRegistry")
            .field("agents", &agents.len())
            .finish_non_exhaustive()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Self {
            agents: RwLock::new(HashMap::new()),
            by_external: RwLock::new(HashMap::new()),
            lifecycle,
            removal_grace: Duration::seconds(DEFAULT_REMOVAL_GRACE_SECS),
        }
    }

    /// Overrides the grace period terminated entries linger before sweep.
    #[must_use]
    pub fn with_removal_grace(mut self, grace: Duration) -> Self {
        self.removal_grace = grace;
        self
    }

    /// Subscribes to lifecycle changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleChange> {
        self.lifecycle.subscribe()
    }

    /// Admits a new agent in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateExternalId`] when a live agent
    /// already claims the manifest's external id.
    ///
    /// # Panics
    ///
    /// Panics if a registry lock has been poisoned.
    pub fn admit(
        &self,
        manifest: AgentManifest,
        node_id: Option<NodeId>,
    ) -> RegistryResult<AgentId> {
        let external_id = manifest.external_id().to_owned();
        let id = AgentId::random();

        let mut by_external = self.by_external.write().expect("registry poisoned");
        if by_external.contains_key(&external_id) {
            return Err(RegistryError::DuplicateExternalId { external_id });
        }
        let entry = AgentEntry::new(id, manifest, node_id);
        by_external.insert(external_id.clone(), id);
        drop(by_external);

        let mut agents = self.agents.write().expect("registry poisoned");
        agents.insert(id, Arc::new(Mutex::new(entry)));
        drop(agents);

        info!(agent_id = %id, external_id = %external_id, "agent admitted");
        Ok(id)
    }

    /// Returns the entry handle for an agent.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    #[must_use]
    pub fn get(&self, id: AgentId) -> Option<Arc<Mutex<AgentEntry>>> {
        let agents = self.agents.read().expect("registry poisoned");
        agents.get(&id).cloned()
    }

    /// Resolves an external id to the internal id.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    #[must_use]
    pub fn resolve_external(&self, external_id: &str) -> Option<AgentId> {
        let by_external = self.by_external.read().expect("registry poisoned");
        by_external.get(external_id).copied()
    }

    /// Produces a snapshot of one agent.
    ///
    /// # Panics
    ///
    /// Panics if a lock has been poisoned.
    #[must_use]
    pub fn snapshot(&self, id: AgentId) -> Option<AgentSnapshot> {
        self.get(id)
            .map(|entry| entry.lock().expect("agent entry poisoned").snapshot())
    }

    /// Produces snapshots of every registered agent.
    ///
    /// # Panics
    ///
    /// Panics if a lock has been poisoned.
    #[must_use]
    pub fn snapshots(&self) -> Vec<AgentSnapshot> {
        let agents = self.agents.read().expect("registry poisoned");
        let mut listed: Vec<AgentSnapshot> = agents
            .values()
            .map(|entry| entry.lock().expect("agent entry poisoned").snapshot())
            .collect();
        listed.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        listed
    }

    /// Number of registered (non-swept) agents.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock has been poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        let agents = self.agents.read().expect("registry poisoned");
        agents.len()
    }

    /// Returns `true` when no agents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies a lifecycle transition and broadcasts the change.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown agents or the
    /// underlying [`StateError`] for refused transitions.
    ///
    /// # Panics
    ///
    /// Panics if a lock has been poisoned.
    pub fn transition(&self, id: AgentId, to: AgentState) -> RegistryResult<AgentState> {
        let entry = self.get(id).ok_or(RegistryError::NotFound)?;
        let (from, state) = {
            let mut entry = entry.lock().expect("agent entry poisoned");
            let from = entry.state();
            let state = entry.transition(to)?;
            (from, state)
        };
        debug!(agent_id = %id, from = from.as_str(), to = state.as_str(), "lifecycle transition");
        let _ = self.lifecycle.send(LifecycleChange {
            agent_id: id,
            from,
            to: state,
        });
        Ok(state)
    }

    /// Removes terminated entries whose grace period has elapsed,
    /// returning the swept ids.
    ///
    /// # Panics
    ///
    /// Panics if a lock has been poisoned.
    pub fn sweep_terminated(&self) -> Vec<AgentId> {
        let cutoff = Utc::now() - self.removal_grace;
        let mut swept = Vec::new();

        // Same lock order as `admit`: external index first, then the map.
        let mut by_external = self.by_external.write().expect("registry poisoned");
        let mut agents = self.agents.write().expect("registry poisoned");
        agents.retain(|id, entry| {
            let entry = entry.lock().expect("agent entry poisoned");
            let expired = entry.state().is_terminal()
                && entry.deleted_at().is_some_and(|at| at <= cutoff);
            if expired {
                by_external.remove(entry.external_id());
                swept.push(*id);
            }
            !expired
        });
        drop(agents);
        drop(by_external);

        for id in &swept {
            info!(agent_id = %id, "terminated agent swept");
        }
        swept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(external_id: &str) -> AgentManifest {
        AgentManifest::builder(external_id)
            .name("Worker")
            .unwrap()
            .version("1.0")
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn admit_and_resolve() {
        let registry = AgentRegistry::new();
        let id = registry.admit(manifest("worker-1"), None).unwrap();
        assert_eq!(registry.resolve_external("worker-1"), Some(id));
        assert_eq!(registry.len(), 1);

        let err = registry
            .admit(manifest("worker-1"), None)
            .expect_err("duplicate external id");
        assert!(matches!(err, RegistryError::DuplicateExternalId { .. }));
    }

    #[tokio::test]
    async fn transition_broadcasts_change() {
        let registry = AgentRegistry::new();
        let id = registry.admit(manifest("worker-1"), None).unwrap();
        let mut rx = registry.subscribe();

        registry.transition(id, AgentState::Initializing).unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.agent_id, id);
        assert_eq!(change.from, AgentState::Created);
        assert_eq!(change.to, AgentState::Initializing);
    }

    #[test]
    fn sweep_respects_grace() {
        let registry = AgentRegistry::new().with_removal_grace(Duration::zero());
        let id = registry.admit(manifest("worker-1"), None).unwrap();
        registry.transition(id, AgentState::Terminated).unwrap();

        let swept = registry.sweep_terminated();
        assert_eq!(swept, vec![id]);
        assert!(registry.get(id).is_none());
        assert_eq!(registry.resolve_external("worker-1"), None);

        // External id becomes reusable after sweep.
        registry.admit(manifest("worker-1"), None).unwrap();
    }

    #[test]
    fn sweep_keeps_recent_terminations() {
        let registry = AgentRegistry::new().with_removal_grace(Duration::seconds(3600));
        let id = registry.admit(manifest("worker-1"), None).unwrap();
        registry.transition(id, AgentState::Terminated).unwrap();
        assert!(registry.sweep_terminated().is_empty());
        assert!(registry.get(id).is_some());
    }
}

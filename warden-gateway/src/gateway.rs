//! Gateway construction and lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use thiserror::Error;
use tracing::info;

use warden_a2a::A2aTaskEngine;
use warden_capability::CapabilityStore;
use warden_governance::{GovernanceLoop, GovernanceStore, InMemoryGovernanceStore};
use warden_kernel::{
    AgentRegistry, AgentState, CostTable, HealthMonitor, TaskScheduler,
};
use warden_memory::{InMemoryMemoryStore, MemoryFacade, MemoryStore};
use warden_policy::{
    FileOperation, PolicyDecision, PolicyRule, PolicySet, PolicySetConfig, RuleMatcher,
};
use warden_primitives::{AgentId, AgentManifest, NodeId};
use warden_services::{
    AgentDirectoryStore, AuditQuery, AuditStore, CommunityStore, EchoProvider, EmbeddingService,
    EventBus, BroadcastBus, DeterministicEmbeddingService, GatewayEvent, InMemoryAuditStore,
    InMemoryCommunityStore, InMemoryDirectoryStore, InMemoryUsageStore, InMemoryVectorStore,
    LlmProvider, LlmRouter, UsageStore, VectorStore,
};
use warden_tools::{register_builtins, BuiltinOptions, InvokeCaps, ToolRegistry, UrlFetcher};

use crate::cluster::ClusterSync;
use crate::config::GatewayConfig;
use crate::dispatch::{Dispatcher, DispatcherSeed};
use crate::error::{TaskError, TaskResult};

const HEALTH_TICK: Duration = Duration::from_secs(30);

/// Errors surfaced while building or starting the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// Policy construction failure.
    #[error(transparent)]
    Policy(#[from] warden_policy::PolicyError),

    /// Tool registration failure.
    #[error(transparent)]
    Tools(#[from] warden_tools::ToolError),

    /// Primitive validation failure.
    #[error(transparent)]
    Primitives(#[from] warden_primitives::Error),

    /// A required external service is unreachable.
    #[error("initialization error: {0}")]
    Init(String),
}

/// External collaborator implementations supplied at construction.
pub struct ExternalServices {
    /// Audit trail store.
    pub audit: Arc<dyn AuditStore>,
    /// Governance store.
    pub governance: Arc<dyn GovernanceStore>,
    /// Community store (forums, jobs, reputation).
    pub community: Arc<dyn CommunityStore>,
    /// Provider usage store.
    pub usage: Arc<dyn UsageStore>,
    /// Cluster agent directory.
    pub directory: Arc<dyn AgentDirectoryStore>,
    /// Memory persistence.
    pub memory: Arc<dyn MemoryStore>,
    /// Vector store, when available.
    pub vectors: Option<Arc<dyn VectorStore>>,
    /// Embedding service, when available.
    pub embedder: Option<Arc<dyn EmbeddingService>>,
    /// LLM providers, consulted in order.
    pub providers: Vec<Arc<dyn LlmProvider>>,
    /// URL fetcher enabling the `builtin:http_fetch` tool.
    pub fetcher: Option<Arc<dyn UrlFetcher>>,
}

impl ExternalServices {
    /// Fully in-memory services for tests and single-node deployments.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            audit: Arc::new(InMemoryAuditStore::new()),
            governance: Arc::new(InMemoryGovernanceStore::new()),
            community: Arc::new(InMemoryCommunityStore::new()),
            usage: Arc::new(InMemoryUsageStore::new()),
            directory: Arc::new(InMemoryDirectoryStore::new()),
            memory: Arc::new(InMemoryMemoryStore::new()),
            vectors: Some(Arc::new(InMemoryVectorStore::new())),
            embedder: Some(Arc::new(DeterministicEmbeddingService)),
            providers: vec![Arc::new(EchoProvider::new("echo", "echo-1"))],
            fetcher: None,
        }
    }
}

/// The assembled gateway: all components, threaded explicitly.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<AgentRegistry>,
    capabilities: Arc<CapabilityStore>,
    dispatcher: Arc<Dispatcher>,
    a2a: Arc<A2aTaskEngine>,
    health: Arc<HealthMonitor>,
    bus: Arc<dyn EventBus>,
    router: Arc<LlmRouter>,
    audit: Arc<dyn AuditStore>,
    scheduler: TaskScheduler,
    cluster: Option<Arc<ClusterSync>>,
    started_at: Instant,
    connections: AtomicUsize,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("node_id", &self.config.node_id)
            .field("agents", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Builds a gateway from configuration and external services.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] when production hardening finds a
    /// missing secret or permissive policy default, or construction of a
    /// component fails.
    pub fn new(config: GatewayConfig, services: ExternalServices) -> Result<Arc<Self>, GatewayError> {
        let mut config = config;
        if config.production_hardening {
            if config.auth_token.trim().is_empty() {
                return Err(GatewayError::Config(
                    "production hardening requires an auth token".into(),
                ));
            }
            if config.capability_secret.trim().is_empty() {
                return Err(GatewayError::Config(
                    "production hardening requires a capability secret".into(),
                ));
            }
        }
        if config.capability_secret.is_empty() {
            let mut secret = [0_u8; 32];
            rand::thread_rng().fill_bytes(&mut secret);
            config.capability_secret = hex::encode(secret);
        }
        if config.require_vector_store && services.vectors.is_none() {
            return Err(GatewayError::Init("vector store required but absent".into()));
        }

        let node_id = config
            .node_id
            .as_deref()
            .map(NodeId::new)
            .transpose()
            .map_err(GatewayError::Primitives)?;

        let policy = Arc::new(build_policy(&config)?);
        let capabilities = Arc::new(CapabilityStore::new(
            config.capability_secret.clone().into_bytes(),
        ));
        let registry = Arc::new(AgentRegistry::new());
        let bus: Arc<dyn EventBus> = Arc::new(BroadcastBus::default());
        let scheduler = TaskScheduler::default();

        let tools = Arc::new(ToolRegistry::new(InvokeCaps::default()));
        register_builtins(
            &tools,
            BuiltinOptions {
                fetcher: services.fetcher,
            },
        )?;

        let mut memory = MemoryFacade::new(Arc::clone(&services.memory))
            .with_encryption(config.memory_encryption);
        if let Some(vectors) = services.vectors {
            memory = memory.with_vector_store(vectors);
        }
        if let Some(embedder) = services.embedder {
            memory = memory.with_embedder(embedder);
        }
        let memory = Arc::new(memory);

        let router = Arc::new(LlmRouter::new(services.providers));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&bus),
            config.health,
        ));
        let governance = Arc::new(GovernanceLoop::new(
            Arc::clone(&services.governance),
            Arc::clone(&services.audit),
            Arc::clone(&bus),
        ));

        let dispatcher = Arc::new(Dispatcher::new(DispatcherSeed {
            registry: Arc::clone(&registry),
            capabilities: Arc::clone(&capabilities),
            policy,
            memory,
            tools,
            router: Arc::clone(&router),
            cost_table: CostTable::default(),
            audit: Arc::clone(&services.audit),
            governance_store: Arc::clone(&services.governance),
            governance,
            community: services.community,
            usage: services.usage,
            directory: Arc::clone(&services.directory),
            bus: Arc::clone(&bus),
            health: Arc::clone(&health),
            node_id: node_id.clone(),
        }));

        let a2a = Arc::new(
            A2aTaskEngine::new(
                Arc::clone(&dispatcher) as Arc<dyn warden_a2a::TaskExecutor>,
                Arc::clone(&bus),
                scheduler.clone(),
            )
            .with_task_ttl(Duration::from_secs(config.a2a_task_ttl_secs)),
        );
        dispatcher.attach_a2a(Arc::clone(&a2a));

        let cluster = node_id.map(|node_id| {
            Arc::new(ClusterSync::new(
                Arc::clone(&registry),
                Arc::clone(&services.directory),
                node_id,
            ))
        });

        Ok(Arc::new(Self {
            config,
            registry,
            capabilities,
            dispatcher,
            a2a,
            health,
            bus,
            router,
            audit: services.audit,
            scheduler,
            cluster,
            started_at: Instant::now(),
            connections: AtomicUsize::new(0),
        }))
    }

    /// Probes required services and starts the background loops (health
    /// ticks, A2A janitor, cluster mirroring).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Init`] when a required service is
    /// unreachable or a background task cannot be scheduled.
    pub async fn start(self: &Arc<Self>) -> Result<(), GatewayError> {
        if self.config.requires_persistent_store {
            self.audit
                .query(&AuditQuery {
                    limit: 1,
                    ..AuditQuery::default()
                })
                .await
                .map_err(|err| GatewayError::Init(format!("persistent store probe: {err}")))?;
        }

        let _health_loop = Arc::clone(&self.health)
            .start(&self.scheduler, HEALTH_TICK)
            .map_err(|err| GatewayError::Init(err.to_string()))?;
        self.a2a
            .start_janitor()
            .map_err(|err| GatewayError::Init(err.to_string()))?;
        if let Some(cluster) = &self.cluster {
            Arc::clone(cluster)
                .start(&self.scheduler)
                .map_err(|err| GatewayError::Init(err.to_string()))?;
        }

        info!(
            node_id = self.config.node_id.as_deref().unwrap_or("standalone"),
            "gateway started"
        );
        Ok(())
    }

    /// Admits an agent and walks it to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns a conflict for duplicate external ids.
    pub async fn spawn_agent(&self, manifest: AgentManifest) -> TaskResult<AgentId> {
        let node_id = self.cluster.as_ref().map(|c| c.node_id().clone());
        let id = self
            .registry
            .admit(manifest, node_id)
            .map_err(|err| match err {
                warden_kernel::RegistryError::DuplicateExternalId { external_id } => {
                    TaskError::Conflict(format!("external id `{external_id}` is taken"))
                }
                other => TaskError::Internal(other.to_string()),
            })?;
        self.registry
            .transition(id, AgentState::Initializing)
            .map_err(|err| TaskError::Internal(err.to_string()))?;
        self.registry
            .transition(id, AgentState::Ready)
            .map_err(|err| TaskError::Internal(err.to_string()))?;

        if let Some(cluster) = &self.cluster {
            cluster.mirror(id).await;
        }
        self.bus.publish(GatewayEvent::new(
            "events",
            "agent.spawned",
            serde_json::json!({"agentId": id.to_string()}),
        ));
        Ok(id)
    }

    /// Terminates an agent and revokes its capabilities.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` for unknown agents.
    pub async fn terminate_agent(&self, id: AgentId) -> TaskResult<()> {
        self.registry
            .transition(id, AgentState::Terminated)
            .map_err(|err| match err {
                warden_kernel::RegistryError::NotFound => TaskError::NotFound("agent".into()),
                other => TaskError::Validation(other.to_string()),
            })?;
        self.capabilities.revoke_all(id);
        if let Some(cluster) = &self.cluster {
            cluster.remove(id).await;
        }
        self.bus.publish(GatewayEvent::new(
            "events",
            "agent.terminated",
            serde_json::json!({"agentId": id.to_string()}),
        ));
        Ok(())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Returns the agent registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Returns the capability store.
    #[must_use]
    pub fn capabilities(&self) -> &Arc<CapabilityStore> {
        &self.capabilities
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Returns the health monitor.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Returns the event bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Returns the LLM router.
    #[must_use]
    pub fn router(&self) -> &Arc<LlmRouter> {
        &self.router
    }

    /// Seconds since the gateway started.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Number of live client connections.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Registers a new client connection.
    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Deregisters a client connection.
    pub fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }
}

fn build_policy(config: &GatewayConfig) -> Result<PolicySet, warden_policy::PolicyError> {
    let set = PolicySet::new(PolicySetConfig {
        default_decision: Some(PolicyDecision::Block),
        home_dir: std::env::var("HOME").ok(),
        production_hardening: config.production_hardening,
        audit_capacity: 0,
    })?;

    let path_patterns: Vec<String> = if config.allowed_paths.is_wildcard() {
        vec!["/**".into()]
    } else {
        config.allowed_paths.entries().to_vec()
    };
    if !path_patterns.is_empty() {
        set.add_rule(PolicyRule::new(
            "config-allowed-paths",
            10,
            RuleMatcher::File {
                path_patterns,
                operations: vec![
                    FileOperation::Read,
                    FileOperation::Write,
                    FileOperation::List,
                ],
            },
            PolicyDecision::Allow,
        )?);
    }

    let host_patterns: Vec<String> = if config.allowed_domains.is_wildcard() {
        vec!["**".into()]
    } else {
        config.allowed_domains.entries().to_vec()
    };
    if !host_patterns.is_empty() {
        set.add_rule(PolicyRule::new(
            "config-allowed-domains",
            10,
            RuleMatcher::Network {
                host_patterns,
                ports: vec![],
                protocols: vec![],
            },
            PolicyDecision::Allow,
        )?);
    }

    let command_patterns: Vec<String> = if config.allowed_commands.is_wildcard() {
        vec!["**".into()]
    } else {
        config.allowed_commands.entries().to_vec()
    };
    if !command_patterns.is_empty() {
        set.add_rule(PolicyRule::new(
            "config-allowed-commands",
            10,
            RuleMatcher::Shell { command_patterns },
            PolicyDecision::Allow,
        )?);
    }

    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_requires_secrets() {
        let config = GatewayConfig {
            production_hardening: true,
            ..GatewayConfig::default()
        };
        let err = Gateway::new(config, ExternalServices::in_memory()).expect_err("no secrets");
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[tokio::test]
    async fn spawn_walks_agent_to_ready() {
        let config = GatewayConfig {
            auth_token: "secret".into(),
            ..GatewayConfig::default()
        };
        let gateway = Gateway::new(config, ExternalServices::in_memory()).unwrap();
        let manifest = AgentManifest::builder("worker-1")
            .name("Worker")
            .unwrap()
            .version("1.0")
            .unwrap()
            .build()
            .unwrap();
        let id = gateway.spawn_agent(manifest).await.unwrap();
        let snapshot = gateway.registry().snapshot(id).unwrap();
        assert_eq!(snapshot.state, AgentState::Ready);

        gateway.terminate_agent(id).await.unwrap();
        let snapshot = gateway.registry().snapshot(id).unwrap();
        assert_eq!(snapshot.state, AgentState::Terminated);
        assert!(snapshot.deleted_at.is_some());
    }

    #[test]
    fn missing_vector_store_fails_when_required() {
        let mut services = ExternalServices::in_memory();
        services.vectors = None;
        let config = GatewayConfig {
            require_vector_store: true,
            ..GatewayConfig::default()
        };
        let err = Gateway::new(config, services).expect_err("vectors required");
        assert!(matches!(err, GatewayError::Init(_)));
    }
}

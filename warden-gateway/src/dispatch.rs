//! The dispatch engine: gate chain, handlers, accounting, audit.

use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use warden_a2a::{A2aError, A2aResult, A2aTaskEngine, TargetProfile, TaskExecutor};
use warden_capability::{CapabilityStore, GrantRequest, Permission};
use warden_governance::{AppealStatus, GovernanceLoop, GovernancePolicy, GovernanceStore, SanctionKind};
use warden_kernel::{
    apply_usage, check_cost_budget, check_token_rate, consume_request, consume_tool_call,
    rollback_request, rollback_tool_call, AgentRegistry, CostTable, HealthMonitor, RateLimitKind,
};
use warden_memory::{
    EpisodeParams, FactParams, MemoryFacade, MemoryKind, ProcedureParams, SearchFilter,
};
use warden_policy::{InputSanitizer, PolicySet, SanitizeContext};
use warden_primitives::{AgentId, NodeId};
use warden_services::{
    AgentDirectoryStore, AuditOutcome, AuditQuery, AuditStore, ChatMessage, ChatRole,
    CommunityStore, EventBus, GatewayEvent, LlmChunk, LlmRequest, LlmRouter, NewAuditRecord,
    UsageStore,
};

use crate::error::{TaskError, TaskResult};
use crate::task::{ApprovalInfo, TaskPayload};

/// Per-dispatch options supplied by the connection surface.
#[derive(Default)]
pub struct DispatchOptions {
    /// Sink for streaming chat chunks.
    pub chunk_sink: Option<mpsc::Sender<LlmChunk>>,
    /// Caller identity for delegated (A2A) execution.
    pub delegated_from: Option<AgentId>,
}

/// Everything the dispatcher needs, wired once by the gateway.
pub struct DispatcherSeed {
    /// Agent registry.
    pub registry: Arc<AgentRegistry>,
    /// Capability store.
    pub capabilities: Arc<CapabilityStore>,
    /// Policy set for structural resources.
    pub policy: Arc<PolicySet>,
    /// Memory facade.
    pub memory: Arc<MemoryFacade>,
    /// Tool registry.
    pub tools: Arc<warden_tools::ToolRegistry>,
    /// LLM router.
    pub router: Arc<LlmRouter>,
    /// Per-model pricing.
    pub cost_table: CostTable,
    /// Audit store.
    pub audit: Arc<dyn AuditStore>,
    /// Governance store.
    pub governance_store: Arc<dyn GovernanceStore>,
    /// Governance review loop.
    pub governance: Arc<GovernanceLoop>,
    /// Community store.
    pub community: Arc<dyn CommunityStore>,
    /// Provider usage store.
    pub usage: Arc<dyn UsageStore>,
    /// Cluster agent directory.
    pub directory: Arc<dyn AgentDirectoryStore>,
    /// Event bus.
    pub bus: Arc<dyn EventBus>,
    /// Health monitor (anomaly feed).
    pub health: Arc<HealthMonitor>,
    /// This node's cluster id, when clustered.
    pub node_id: Option<NodeId>,
}

/// The central switch every task passes through.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    capabilities: Arc<CapabilityStore>,
    policy: Arc<PolicySet>,
    sanitizer: InputSanitizer,
    memory: Arc<MemoryFacade>,
    tools: Arc<warden_tools::ToolRegistry>,
    router: Arc<LlmRouter>,
    cost_table: CostTable,
    audit: Arc<dyn AuditStore>,
    governance_store: Arc<dyn GovernanceStore>,
    governance: Arc<GovernanceLoop>,
    community: Arc<dyn CommunityStore>,
    usage: Arc<dyn UsageStore>,
    directory: Arc<dyn AgentDirectoryStore>,
    bus: Arc<dyn EventBus>,
    health: Arc<HealthMonitor>,
    node_id: Option<NodeId>,
    a2a: OnceLock<Arc<A2aTaskEngine>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Builds the dispatcher from its wired components.
    #[must_use]
    pub fn new(seed: DispatcherSeed) -> Self {
        Self {
            registry: seed.registry,
            capabilities: seed.capabilities,
            policy: seed.policy,
            sanitizer: InputSanitizer::new(),
            memory: seed.memory,
            tools: seed.tools,
            router: seed.router,
            cost_table: seed.cost_table,
            audit: seed.audit,
            governance_store: seed.governance_store,
            governance: seed.governance,
            community: seed.community,
            usage: seed.usage,
            directory: seed.directory,
            bus: seed.bus,
            health: seed.health,
            node_id: seed.node_id,
            a2a: OnceLock::new(),
        }
    }

    /// Wires the A2A engine after construction (the engine executes
    /// through this dispatcher).
    pub fn attach_a2a(&self, engine: Arc<A2aTaskEngine>) {
        let _ = self.a2a.set(engine);
    }

    fn a2a(&self) -> TaskResult<&Arc<A2aTaskEngine>> {
        self.a2a
            .get()
            .ok_or_else(|| TaskError::Internal("a2a engine not wired".into()))
    }

    /// Runs one task through the full gate chain and executes it.
    ///
    /// Every gate rejection writes an audit record before the error is
    /// returned; successes write `<action>`/success and feed the
    /// governance loop.
    ///
    /// # Errors
    ///
    /// Returns the caller-observable [`TaskError`] taxonomy.
    pub async fn dispatch(
        &self,
        agent_id: AgentId,
        raw: &Value,
        options: DispatchOptions,
    ) -> TaskResult<Value> {
        let actor = agent_id.to_string();

        // Shape: a string `type` must exist before any other gate.
        let Some(task_type) = TaskPayload::raw_type(raw) else {
            let err = TaskError::Validation("Task payload must declare a string `type`".into());
            self.record(&actor, "task.invalid", "task", None, json!({"error": err.to_string()}), AuditOutcome::Failure)
                .await;
            return Err(err);
        };
        let task_type = task_type.to_owned();

        let entry = self
            .registry
            .get(agent_id)
            .ok_or_else(|| TaskError::NotFound("agent".into()))?;

        // Sanction gate. Appeal operations are the only escape hatch.
        if !TaskPayload::is_appeal_operation(&task_type) {
            let active = self.governance_store.active_sanctions(agent_id).await?;
            if let Some(sanction) = active.first() {
                self.record(
                    &actor,
                    "sanction.enforced",
                    "task",
                    Some(task_type.clone()),
                    json!({"kind": sanction.kind.as_str()}),
                    AuditOutcome::Denied,
                )
                .await;
                return Err(TaskError::Sanctioned(sanction.kind));
            }
        }

        // State gate.
        let (state, trust, manifest) = {
            let entry = entry.lock().expect("agent entry poisoned");
            (entry.state(), entry.trust_level(), entry.manifest().clone())
        };
        if state.refuses_tasks() {
            let err = TaskError::Validation(format!("Agent is {}", state.as_str()));
            self.record(
                &actor,
                "task.state_rejected",
                "task",
                Some(task_type.clone()),
                json!({"state": state.as_str()}),
                AuditOutcome::Failure,
            )
            .await;
            return Err(err);
        }

        // Schema validation.
        let (payload, approval) = match TaskPayload::parse(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.record(
                    &actor,
                    "task.invalid",
                    "task",
                    Some(task_type.clone()),
                    json!({"error": err.to_string()}),
                    AuditOutcome::Failure,
                )
                .await;
                return Err(err);
            }
        };

        // Approval gate.
        let needs_confirmation = if let TaskPayload::InvokeTool { tool_id, .. } = &payload {
            self.tools
                .get(tool_id)
                .is_some_and(|definition| definition.requires_confirmation())
        } else {
            false
        };
        if trust.requires_approval() || needs_confirmation {
            let approved = matches!(
                &approval,
                Some(ApprovalInfo { approved_by, .. }) if !approved_by.trim().is_empty()
            );
            if !approved {
                self.record(
                    &actor,
                    "approval.required",
                    "task",
                    Some(task_type.clone()),
                    json!({"trustLevel": trust.as_str(), "requiresConfirmation": needs_confirmation}),
                    AuditOutcome::Denied,
                )
                .await;
                return Err(TaskError::ApprovalRequired);
            }
        }

        // Permission gate.
        if let Some((category, action, resource)) = payload.required_capability() {
            let covered = self
                .capabilities
                .check(agent_id, category, action, resource.as_deref())
                .map_err(|err| TaskError::Internal(err.to_string()))?;
            if !covered {
                self.record(
                    &actor,
                    "permission.denied",
                    "task",
                    Some(task_type.clone()),
                    json!({"category": category, "action": action, "resource": resource}),
                    AuditOutcome::Denied,
                )
                .await;
                return Err(TaskError::PermissionDenied(format!("{category}.{action}")));
            }
        }

        // Rate, token-rate, and budget gates. Request and tool-call slots
        // are consumed up front so a concurrent burst cannot all observe
        // spare capacity; they are returned on later rejection or failed
        // provider I/O.
        let mut consumed_request = false;
        let mut consumed_tool_call = false;
        if payload.consumes_request_slot() {
            let gate = {
                let mut entry = entry.lock().expect("agent entry poisoned");
                consume_request(&mut entry)
            };
            if let Err(kind) = gate {
                self.reject_rate_limited(&actor, &task_type, kind).await;
                return Err(TaskError::RateLimited(kind));
            }
            consumed_request = true;
        }
        if matches!(payload, TaskPayload::InvokeTool { .. }) {
            let gate = {
                let mut entry = entry.lock().expect("agent entry poisoned");
                consume_tool_call(&mut entry)
            };
            if let Err(kind) = gate {
                if consumed_request {
                    let mut entry = entry.lock().expect("agent entry poisoned");
                    rollback_request(&mut entry);
                }
                self.reject_rate_limited(&actor, &task_type, kind).await;
                return Err(TaskError::RateLimited(kind));
            }
            consumed_tool_call = true;
        }
        if matches!(payload, TaskPayload::Chat { .. }) {
            let gates = {
                let mut entry = entry.lock().expect("agent entry poisoned");
                check_token_rate(&mut entry).and_then(|()| check_cost_budget(&entry))
            };
            if let Err(kind) = gates {
                {
                    let mut entry = entry.lock().expect("agent entry poisoned");
                    rollback_request(&mut entry);
                }
                if kind == RateLimitKind::CostBudget {
                    self.record(
                        &actor,
                        "budget.exceeded",
                        "task",
                        Some(task_type.clone()),
                        json!({"kind": kind.as_str()}),
                        AuditOutcome::Blocked,
                    )
                    .await;
                    self.bus.publish(GatewayEvent::new(
                        "alerts",
                        "budget.exceeded",
                        json!({"agentId": actor}),
                    ));
                    return Err(TaskError::BudgetExceeded);
                }
                self.reject_rate_limited(&actor, &task_type, kind).await;
                return Err(TaskError::RateLimited(kind));
            }
        }

        // Input-safety gate for LLM-bound user messages.
        if let TaskPayload::Chat { messages, .. } = &payload {
            for message in messages.iter().filter(|m| m.role == ChatRole::User) {
                let report = self
                    .sanitizer
                    .inspect(&message.content, SanitizeContext::LlmMessage);
                if !report.safe {
                    {
                        let mut entry = entry.lock().expect("agent entry poisoned");
                        rollback_request(&mut entry);
                    }
                    self.record(
                        &actor,
                        "policy.injection_blocked",
                        "task",
                        Some(task_type.clone()),
                        json!({"warnings": report.warnings}),
                        AuditOutcome::Blocked,
                    )
                    .await;
                    self.bus.publish(GatewayEvent::new(
                        "alerts",
                        "security.prompt_injection",
                        json!({"agentId": actor, "warnings": report.warnings}),
                    ));
                    return Err(TaskError::InjectionBlocked);
                }
            }
        }

        // Execute.
        let audit_action = payload.audit_action();
        let delegated_from = options.delegated_from;
        let executed = self
            .execute(agent_id, &entry, &manifest, payload, options)
            .await;

        match executed {
            Ok((result, resource_id)) => {
                {
                    let mut entry = entry.lock().expect("agent entry poisoned");
                    entry.record_task_outcome(true);
                    entry.touch();
                }
                let mut details = Map::new();
                details.insert("taskType".into(), json!(task_type));
                if let Some(from) = delegated_from {
                    details.insert("fromAgentId".into(), json!(from.to_string()));
                }
                self.record(
                    &actor,
                    audit_action,
                    "task",
                    resource_id,
                    Value::Object(details),
                    AuditOutcome::Success,
                )
                .await;
                Ok(result)
            }
            Err(err) => {
                {
                    let mut entry = entry.lock().expect("agent entry poisoned");
                    if consumed_request {
                        rollback_request(&mut entry);
                    }
                    if consumed_tool_call {
                        rollback_tool_call(&mut entry);
                    }
                    entry.record_task_outcome(false);
                }
                let (action, outcome) = match &err {
                    TaskError::PermissionDenied(_) => ("permission.denied", AuditOutcome::Denied),
                    TaskError::PolicyBlocked(_) => ("policy.blocked", AuditOutcome::Blocked),
                    _ => (audit_action, AuditOutcome::Failure),
                };
                self.record(
                    &actor,
                    action,
                    "task",
                    Some(task_type),
                    json!({"error": err.to_string(), "code": err.code()}),
                    outcome,
                )
                .await;
                Err(err)
            }
        }
    }

    async fn reject_rate_limited(&self, actor: &str, task_type: &str, kind: RateLimitKind) {
        self.record(
            actor,
            "rate_limit.exceeded",
            "task",
            Some(task_type.to_owned()),
            json!({"kind": kind.as_str()}),
            AuditOutcome::Blocked,
        )
        .await;
        self.bus.publish(GatewayEvent::new(
            "alerts",
            "rate_limit.exceeded",
            json!({"agentId": actor, "kind": kind.as_str()}),
        ));
    }

    /// Appends an audit record and feeds it to the governance loop.
    async fn record(
        &self,
        actor: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<String>,
        details: Value,
        outcome: AuditOutcome,
    ) {
        let mut record = NewAuditRecord::new(actor, action, resource_type, outcome)
            .with_details(details);
        if let Some(resource_id) = resource_id {
            record = record.with_resource_id(resource_id);
        }
        match self.audit.append(record).await {
            Ok(persisted) => {
                if let Err(err) = self.governance.review(&persisted).await {
                    warn!(error = %err, "governance review failed");
                }
            }
            Err(err) => warn!(error = %err, action, "audit append failed"),
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn execute(
        &self,
        agent_id: AgentId,
        entry: &Arc<std::sync::Mutex<warden_kernel::AgentEntry>>,
        manifest: &warden_primitives::AgentManifest,
        payload: TaskPayload,
        options: DispatchOptions,
    ) -> TaskResult<(Value, Option<String>)> {
        match payload {
            TaskPayload::Echo { content } => {
                Ok((json!({"type": "echo", "content": content}), None))
            }

            TaskPayload::Chat {
                messages,
                model,
                max_tokens,
                stream,
            } => {
                self.execute_chat(agent_id, entry, manifest, messages, model, max_tokens, stream, options)
                    .await
            }

            TaskPayload::StoreFact {
                category,
                kind,
                content,
                importance,
                tags,
                source,
            } => {
                let id = self
                    .memory
                    .store_fact(
                        agent_id,
                        FactParams {
                            category,
                            kind,
                            content,
                            importance,
                            tags,
                            source,
                        },
                    )
                    .await?;
                Ok((json!({"factId": id}), Some(id.to_string())))
            }

            TaskPayload::RecordEpisode {
                event_name,
                context,
                outcome,
                success,
                importance,
                tags,
                session_id,
            } => {
                let id = self
                    .memory
                    .record_episode(
                        agent_id,
                        EpisodeParams {
                            event_name,
                            context,
                            outcome,
                            success,
                            importance,
                            tags,
                            session_id,
                        },
                    )
                    .await?;
                Ok((json!({"episodeId": id}), Some(id.to_string())))
            }

            TaskPayload::SearchMemory {
                query,
                types,
                tags,
                min_importance,
                min_similarity,
                limit,
                include_embeddings,
            } => {
                let kinds = types
                    .iter()
                    .map(|label| match label.as_str() {
                        "episodic" => Ok(MemoryKind::Episodic),
                        "semantic" => Ok(MemoryKind::Semantic),
                        "procedural" => Ok(MemoryKind::Procedural),
                        other => Err(TaskError::Validation(format!(
                            "Unknown memory type `{other}`"
                        ))),
                    })
                    .collect::<TaskResult<Vec<_>>>()?;
                let hits = self
                    .memory
                    .search(
                        agent_id,
                        SearchFilter {
                            kinds,
                            tags,
                            min_importance,
                            min_similarity,
                            since: None,
                            until: None,
                            limit: limit.unwrap_or(0),
                            include_embeddings,
                            query,
                        },
                    )
                    .await?;
                Ok((json!({"results": hits}), None))
            }

            TaskPayload::ListTools => {
                let tools: Vec<Value> = self
                    .tools
                    .list_for(manifest)
                    .into_iter()
                    .map(|definition| {
                        json!({
                            "id": definition.id(),
                            "name": definition.name(),
                            "description": definition.description(),
                            "category": definition.category(),
                            "tags": definition.tags(),
                            "requiresConfirmation": definition.requires_confirmation(),
                        })
                    })
                    .collect();
                Ok((json!({"tools": tools}), None))
            }

            TaskPayload::InvokeTool { tool_id, arguments } => {
                let ctx = warden_tools::InvokeContext {
                    agent_id,
                    manifest,
                    capabilities: &self.capabilities,
                    policy: Some(&self.policy),
                };
                let outcome = self
                    .tools
                    .invoke(
                        warden_tools::InvokeRequest {
                            tool_id: tool_id.clone(),
                            args: arguments,
                        },
                        &ctx,
                    )
                    .await?;
                Ok((serde_json::to_value(outcome).unwrap_or(Value::Null), Some(tool_id)))
            }

            TaskPayload::DiscoverAgents => {
                if self.node_id.is_some() {
                    let records = self.directory.list(None).await?;
                    Ok((json!({"agents": records}), None))
                } else {
                    let agents: Vec<Value> = self
                        .registry
                        .snapshots()
                        .into_iter()
                        .filter(|snapshot| !snapshot.state.is_terminal())
                        .map(|snapshot| {
                            json!({
                                "agentId": snapshot.id,
                                "externalId": snapshot.external_id,
                                "name": snapshot.name,
                                "state": snapshot.state.as_str(),
                                "skills": snapshot.skills,
                            })
                        })
                        .collect();
                    Ok((json!({"agents": agents}), None))
                }
            }

            TaskPayload::AgentDirectory => {
                let records = self.directory.list(None).await?;
                Ok((json!({"agents": records}), None))
            }

            TaskPayload::ForumCreate { name, description } => {
                let forum = self
                    .community
                    .create_forum(&name, description.as_deref(), agent_id)
                    .await?;
                let id = forum.id.to_string();
                Ok((json!({"forum": forum}), Some(id)))
            }

            TaskPayload::ForumList => {
                let forums = self.community.list_forums().await?;
                Ok((json!({"forums": forums}), None))
            }

            TaskPayload::ForumPost { forum_id, content } => {
                let post = self.community.create_post(forum_id, agent_id, &content).await?;
                let id = post.id.to_string();
                Ok((json!({"post": post}), Some(id)))
            }

            TaskPayload::ForumPosts { forum_id } => {
                let posts = self.community.list_posts(forum_id).await?;
                Ok((json!({"posts": posts}), None))
            }

            TaskPayload::JobPost {
                title,
                description,
                reward,
            } => {
                let job = self
                    .community
                    .post_job(agent_id, &title, &description, reward.as_deref())
                    .await?;
                let id = job.id.to_string();
                Ok((json!({"job": job}), Some(id)))
            }

            TaskPayload::JobList => {
                let jobs = self.community.list_jobs().await?;
                Ok((json!({"jobs": jobs}), None))
            }

            TaskPayload::JobApply { job_id, note } => {
                let application = self
                    .community
                    .apply_to_job(job_id, agent_id, note.as_deref())
                    .await?;
                let id = application.id.to_string();
                Ok((json!({"application": application}), Some(id)))
            }

            TaskPayload::ReputationGet { agent_id: subject } => {
                let subject = subject.map_or(agent_id, AgentId::from_uuid);
                let record = self.community.reputation(subject).await?;
                Ok((json!({"reputation": record}), None))
            }

            TaskPayload::ReputationList => {
                let records = self.community.list_reputation().await?;
                Ok((json!({"reputation": records}), None))
            }

            TaskPayload::ReputationAdjust { agent_id: subject, delta } => {
                let record = self
                    .community
                    .adjust_reputation(AgentId::from_uuid(subject), delta)
                    .await?;
                Ok((json!({"reputation": record}), Some(subject.to_string())))
            }

            TaskPayload::AuditQuery {
                action,
                action_prefix,
                actor_id,
                limit,
            } => {
                let records = self
                    .audit
                    .query(&AuditQuery {
                        actor_id,
                        action,
                        action_prefix,
                        limit: limit.unwrap_or(100),
                        ..AuditQuery::default()
                    })
                    .await?;
                Ok((json!({"records": records}), None))
            }

            TaskPayload::CapabilityList => {
                let tokens: Vec<Value> = self
                    .capabilities
                    .list_tokens(agent_id)
                    .into_iter()
                    .map(|token| {
                        json!({
                            "tokenId": token.id(),
                            "permissions": token.permissions(),
                            "purpose": token.purpose(),
                            "issuedAt": token.issued_at(),
                            "expiresAt": token.expires_at(),
                            "delegatable": token.delegatable(),
                        })
                    })
                    .collect();
                Ok((json!({"tokens": tokens}), None))
            }

            TaskPayload::CapabilityGrant {
                agent_id: target,
                category,
                actions,
                resource,
                purpose,
                duration_ms,
                delegatable,
            } => {
                let target = target.map_or(agent_id, AgentId::from_uuid);
                self.ensure_manifest_allows(target, &category, &actions)?;
                let mut permission = Permission::new(&category, actions.iter().map(String::as_str))?;
                if let Some(resource) = resource {
                    permission = permission.with_resource(resource);
                }
                let token = self.capabilities.grant(GrantRequest {
                    owner: target,
                    permissions: vec![permission],
                    purpose: purpose.unwrap_or_else(|| "granted via gateway".into()),
                    duration_ms,
                    delegatable,
                })?;
                let id = token.id().to_string();
                Ok((
                    json!({"tokenId": token.id(), "expiresAt": token.expires_at()}),
                    Some(id),
                ))
            }

            TaskPayload::CapabilityRevoke { token_id } => {
                self.capabilities
                    .revoke(warden_primitives::TokenId::from_uuid(token_id))?;
                Ok((json!({"revoked": true}), Some(token_id.to_string())))
            }

            TaskPayload::CapabilityRevokeAll { agent_id: target } => {
                let target = target.map_or(agent_id, AgentId::from_uuid);
                let revoked = self.capabilities.revoke_all(target);
                Ok((json!({"revoked": revoked}), Some(target.to_string())))
            }

            TaskPayload::PolicyCreate {
                name,
                description,
                rules,
            } => {
                let mut policy = GovernancePolicy::new(name, rules);
                if let Some(description) = description {
                    policy = policy.with_description(description);
                }
                let policy = self.governance_store.create_policy(policy).await?;
                let id = policy.id.to_string();
                Ok((json!({"policy": policy}), Some(id)))
            }

            TaskPayload::PolicyList => {
                let policies = self.governance_store.list_policies().await?;
                Ok((json!({"policies": policies}), None))
            }

            TaskPayload::PolicySetStatus { policy_id, status } => {
                self.governance_store.set_policy_status(policy_id, status).await?;
                Ok((json!({"policyId": policy_id, "status": status}), Some(policy_id.to_string())))
            }

            TaskPayload::ModerationCaseOpen { subject, reason } => {
                let case = self
                    .governance_store
                    .open_or_reuse_case(AgentId::from_uuid(subject), None, &reason, Value::Null)
                    .await?;
                let id = case.id.to_string();
                Ok((json!({"case": case}), Some(id)))
            }

            TaskPayload::ModerationCaseList { subject } => {
                let cases = self
                    .governance_store
                    .list_cases(subject.map(AgentId::from_uuid))
                    .await?;
                Ok((json!({"cases": cases}), None))
            }

            TaskPayload::ModerationCaseResolve { case_id, resolution } => {
                let case = self.governance_store.resolve_case(case_id, &resolution).await?;
                Ok((json!({"case": case}), Some(case_id.to_string())))
            }

            TaskPayload::AppealOpen { case_id, reason } => {
                let case = self.governance_store.get_case(case_id).await?;
                let is_admin = self
                    .capabilities
                    .check(agent_id, "governance", "manage", None)
                    .unwrap_or(false);
                if case.subject != agent_id && !is_admin {
                    return Err(TaskError::PermissionDenied("governance.manage".into()));
                }
                let appeal = self
                    .governance_store
                    .open_appeal(case_id, &agent_id.to_string(), &reason)
                    .await?;
                let id = appeal.id.to_string();
                Ok((json!({"appeal": appeal}), Some(id)))
            }

            TaskPayload::AppealList => {
                let appeals = self.governance_store.list_appeals(None).await?;
                Ok((json!({"appeals": appeals}), None))
            }

            TaskPayload::AppealResolve {
                appeal_id,
                status,
                resolution,
            } => {
                if status == AppealStatus::Open {
                    return Err(TaskError::Validation(
                        "Appeal resolution must be `resolved` or `dismissed`".into(),
                    ));
                }
                let appeal = self
                    .governance_store
                    .resolve_appeal(appeal_id, status, &resolution)
                    .await?;
                Ok((json!({"appeal": appeal}), Some(appeal_id.to_string())))
            }

            TaskPayload::SanctionApply {
                subject,
                sanction_type,
                reason,
            } => {
                let kind = SanctionKind::from_str(&sanction_type)?;
                let subject = AgentId::from_uuid(subject);
                let reason = reason.unwrap_or_else(|| "applied by operator".into());
                let case = self
                    .governance_store
                    .open_or_reuse_case(subject, None, &reason, Value::Null)
                    .await?;
                let sanction = self
                    .governance_store
                    .upsert_sanction(case.id, subject, kind, &reason)
                    .await?;
                self.bus.publish(GatewayEvent::new(
                    "alerts",
                    "sanction.applied",
                    json!({"agentId": subject.to_string(), "kind": kind.as_str()}),
                ));
                let id = sanction.id.to_string();
                Ok((json!({"sanction": sanction}), Some(id)))
            }

            TaskPayload::SanctionList { subject } => {
                let sanctions = self
                    .governance_store
                    .list_sanctions(subject.map(AgentId::from_uuid))
                    .await?;
                Ok((json!({"sanctions": sanctions}), None))
            }

            TaskPayload::SanctionLift { sanction_id } => {
                let sanction = self.governance_store.lift_sanction(sanction_id).await?;
                Ok((json!({"sanction": sanction}), Some(sanction_id.to_string())))
            }

            TaskPayload::A2aTask { target, task }
            | TaskPayload::A2aTaskAsync { target, task } => {
                let target = self.resolve_target(&target)?;
                let task_id = self.a2a()?.submit(agent_id, target, task).await?;
                Ok((
                    json!({"taskId": task_id, "status": "submitted"}),
                    Some(task_id.to_string()),
                ))
            }

            TaskPayload::A2aTaskSync {
                target,
                task,
                timeout_ms,
            } => {
                let target = self.resolve_target(&target)?;
                let finished = self
                    .a2a()?
                    .submit_sync(agent_id, target, task, Duration::from_millis(timeout_ms))
                    .await?;
                let id = finished.task_id.to_string();
                Ok((
                    json!({
                        "taskId": finished.task_id,
                        "status": finished.status.as_str(),
                        "result": finished.result,
                        "error": finished.error,
                    }),
                    Some(id),
                ))
            }

            TaskPayload::A2aTaskStatus { task_id } => {
                let task = self
                    .a2a()?
                    .status(warden_primitives::TaskId::from_uuid(task_id))?;
                Ok((
                    json!({
                        "taskId": task.task_id,
                        "status": task.status.as_str(),
                        "result": task.result,
                        "error": task.error,
                    }),
                    None,
                ))
            }

            TaskPayload::ListSkills { target } => {
                let target_id = match target {
                    Some(target) => self.resolve_target(&target)?,
                    None => agent_id,
                };
                let snapshot = self
                    .registry
                    .snapshot(target_id)
                    .ok_or_else(|| TaskError::NotFound("agent".into()))?;
                Ok((json!({"agentId": target_id, "skills": snapshot.skills}), None))
            }

            TaskPayload::InvokeSkill {
                target,
                skill_id,
                input,
            } => {
                let target = self.resolve_target(&target)?;
                let mut task = match input {
                    Value::Object(map) => Value::Object(map),
                    Value::Null => json!({}),
                    other => json!({"input": other}),
                };
                if let Some(object) = task.as_object_mut() {
                    object.insert("skillId".into(), json!(skill_id));
                }
                let finished = self
                    .a2a()?
                    .submit_sync(agent_id, target, task, Duration::from_secs(30))
                    .await?;
                let id = finished.task_id.to_string();
                Ok((
                    json!({
                        "taskId": finished.task_id,
                        "status": finished.status.as_str(),
                        "result": finished.result,
                        "error": finished.error,
                    }),
                    Some(id),
                ))
            }

            TaskPayload::StoreProcedure {
                name,
                trigger,
                steps,
                inputs_schema,
                outputs_schema,
            } => {
                let id = self
                    .memory
                    .learn_procedure(
                        agent_id,
                        ProcedureParams {
                            name,
                            trigger,
                            steps,
                            inputs_schema,
                            outputs_schema,
                        },
                    )
                    .await?;
                Ok((json!({"procedureId": id}), Some(id.to_string())))
            }

            TaskPayload::GetProcedure { procedure_id } => {
                let procedure = self.memory.get_procedure(agent_id, procedure_id).await?;
                Ok((json!({"procedure": procedure}), None))
            }

            TaskPayload::FindProcedures { query } => {
                let procedures = self.memory.find_procedures(agent_id, &query).await?;
                Ok((json!({"procedures": procedures}), None))
            }

            TaskPayload::RecordProcedureExecution {
                procedure_id,
                success,
            } => {
                let procedure = self
                    .memory
                    .record_procedure_execution(agent_id, procedure_id, success)
                    .await?;
                Ok((
                    json!({
                        "procedureId": procedure.id,
                        "successRate": procedure.success_rate,
                        "executionCount": procedure.execution_count,
                    }),
                    Some(procedure_id.to_string()),
                ))
            }

            TaskPayload::Compute { iterations } => {
                let mut accumulator: u64 = 0;
                for i in 0..iterations.min(10_000_000) {
                    accumulator = accumulator.wrapping_add(i.wrapping_mul(i));
                }
                Ok((json!({"iterations": iterations, "result": accumulator}), None))
            }

            TaskPayload::MemoryIntensive { size_mb } => {
                let reported = {
                    let mut entry = entry.lock().expect("agent entry poisoned");
                    let capped = size_mb.min(entry.limits().max_memory_mb);
                    entry.memory_usage_mb = capped;
                    capped
                };
                Ok((json!({"reportedMb": reported}), None))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_chat(
        &self,
        agent_id: AgentId,
        entry: &Arc<std::sync::Mutex<warden_kernel::AgentEntry>>,
        manifest: &warden_primitives::AgentManifest,
        messages: Vec<ChatMessage>,
        model: Option<String>,
        max_tokens: Option<u32>,
        stream: bool,
        options: DispatchOptions,
    ) -> TaskResult<(Value, Option<String>)> {
        if messages.is_empty() {
            return Err(TaskError::Validation("Chat requires at least one message".into()));
        }
        let model = model
            .or_else(|| manifest.preferred_model().map(ToOwned::to_owned))
            .or_else(|| self.router.list_models().into_iter().next())
            .ok_or_else(|| TaskError::Upstream("no model available".into()))?;

        let limits = manifest.limits();
        let request = LlmRequest {
            model: model.clone(),
            messages,
            max_tokens: Some(
                max_tokens
                    .unwrap_or(limits.max_tokens_per_request)
                    .min(limits.max_tokens_per_request),
            ),
            temperature: None,
        };

        let response = match (stream, options.chunk_sink) {
            (true, Some(sink)) => self
                .router
                .route_stream(&request, sink)
                .await
                .map_err(|err| TaskError::Upstream(err.to_string()))?,
            _ => self
                .router
                .route(&request)
                .await
                .map_err(|err| TaskError::Upstream(err.to_string()))?,
        };

        let cost = self.cost_table.estimate(&response.model, response.usage);
        let delta = {
            let mut entry = entry.lock().expect("agent entry poisoned");
            apply_usage(&mut entry, response.usage, cost)
        };
        self.health.observe_token_usage(agent_id, response.usage.total());
        if let Err(err) = self
            .usage
            .record(&response.provider_id, &response.model, response.usage, cost)
            .await
        {
            debug!(error = %err, "provider usage record failed");
        }

        let actor = agent_id.to_string();
        if delta.token_overshoot {
            self.record(
                &actor,
                "rate_limit.token_overshoot",
                "task",
                None,
                json!({"kind": "tokens", "tokens": response.usage.total()}),
                AuditOutcome::Success,
            )
            .await;
        }
        if delta.crossed_budget {
            self.record(
                &actor,
                "budget.reached",
                "task",
                None,
                json!({"costUsd": cost}),
                AuditOutcome::Success,
            )
            .await;
            self.bus.publish(GatewayEvent::new(
                "alerts",
                "budget.reached",
                json!({"agentId": actor}),
            ));
        }

        let episode_context = format!("chat with model {model}");
        if let Err(err) = self
            .memory
            .record_episode(
                agent_id,
                EpisodeParams {
                    event_name: "chat.completed".into(),
                    context: episode_context,
                    outcome: response.content.chars().take(200).collect(),
                    success: true,
                    importance: 0.3,
                    tags: vec!["chat".into()],
                    session_id: None,
                },
            )
            .await
        {
            debug!(error = %err, "chat episode record failed");
        }

        Ok((
            json!({
                "content": response.content,
                "model": response.model,
                "usage": response.usage,
                "providerId": response.provider_id,
                "latencyMs": response.latency_ms,
            }),
            Some(model),
        ))
    }

    fn ensure_manifest_allows(
        &self,
        target: AgentId,
        category: &str,
        actions: &[String],
    ) -> TaskResult<()> {
        let entry = self
            .registry
            .get(target)
            .ok_or_else(|| TaskError::NotFound("agent".into()))?;
        let entry = entry.lock().expect("agent entry poisoned");
        let allowed = entry.manifest().allowed_capabilities();
        let Some(allowed_actions) = allowed.get(category) else {
            return Err(TaskError::Validation(format!(
                "Manifest does not allow capability category `{category}`"
            )));
        };
        for action in actions {
            if !allowed_actions.contains(action) {
                return Err(TaskError::Validation(format!(
                    "Manifest does not allow `{category}.{action}`"
                )));
            }
        }
        Ok(())
    }

    fn resolve_target(&self, target: &str) -> TaskResult<AgentId> {
        if let Ok(id) = AgentId::from_str(target) {
            if self.registry.get(id).is_some() {
                return Ok(id);
            }
        }
        self.registry
            .resolve_external(target)
            .ok_or_else(|| TaskError::NotFound(format!("agent `{target}`")))
    }
}

#[async_trait]
impl TaskExecutor for Dispatcher {
    async fn validate_target(&self, target: AgentId) -> A2aResult<TargetProfile> {
        let entry = self.registry.get(target).ok_or(A2aError::TargetNotFound)?;
        let entry = entry.lock().expect("agent entry poisoned");
        if entry.state().is_terminal() {
            return Err(A2aError::TargetTerminated);
        }
        Ok(TargetProfile {
            skills: entry.manifest().skills().to_vec(),
        })
    }

    async fn execute(
        &self,
        target: AgentId,
        from: AgentId,
        mut payload: Value,
    ) -> Result<Value, String> {
        // A payload addressed by skill id alone dispatches as the task
        // type of the same name.
        if let Some(object) = payload.as_object_mut() {
            if !object.contains_key("type") {
                if let Some(skill) = object.get("skillId").cloned() {
                    object.insert("type".into(), skill);
                }
            }
        }
        self.dispatch(
            target,
            &payload,
            DispatchOptions {
                chunk_sink: None,
                delegated_from: Some(from),
            },
        )
        .await
        .map_err(|err| err.to_string())
    }
}

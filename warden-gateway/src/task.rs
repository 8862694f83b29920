//! Typed task payloads accepted by the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use warden_governance::{AppealStatus, GovernanceRule, PolicyStatus};
use warden_services::ChatMessage;

use crate::error::{TaskError, TaskResult};

/// Approval attached to a task by an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalInfo {
    /// Who approved the task; must be non-empty.
    pub approved_by: String,
    /// Optional approval note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// The task types the dispatcher recognizes.
///
/// Payloads arrive as `{"type": "<snake_case tag>", ...fields}`; unknown
/// tags reject with `Unknown task type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Returns its payload unchanged.
    Echo {
        /// Arbitrary content echoed back.
        #[serde(default)]
        content: Value,
    },
    /// LLM chat completion.
    #[serde(rename_all = "camelCase")]
    Chat {
        /// Conversation messages.
        messages: Vec<ChatMessage>,
        /// Model override; defaults to the manifest's preferred model.
        #[serde(default)]
        model: Option<String>,
        /// Completion token ceiling.
        #[serde(default)]
        max_tokens: Option<u32>,
        /// Stream partial chunks to the connection.
        #[serde(default)]
        stream: bool,
    },
    /// Stores a semantic fact.
    #[serde(rename_all = "camelCase")]
    StoreFact {
        /// Category label.
        category: String,
        /// Kind label within the category.
        #[serde(default = "default_fact_kind")]
        kind: String,
        /// The fact itself.
        content: String,
        /// Importance in `0.0..=1.0`.
        #[serde(default = "default_importance")]
        importance: f32,
        /// Free-form tags.
        #[serde(default)]
        tags: Vec<String>,
        /// Where the fact came from.
        #[serde(default)]
        source: Option<String>,
    },
    /// Records an episodic event.
    #[serde(rename_all = "camelCase")]
    RecordEpisode {
        /// Short event name.
        event_name: String,
        /// Context text.
        context: String,
        /// Outcome text.
        #[serde(default)]
        outcome: String,
        /// Whether the event concluded successfully.
        #[serde(default = "default_true")]
        success: bool,
        /// Importance in `0.0..=1.0`.
        #[serde(default = "default_importance")]
        importance: f32,
        /// Free-form tags.
        #[serde(default)]
        tags: Vec<String>,
        /// Session correlation id.
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Fan-out memory search.
    #[serde(rename_all = "camelCase")]
    SearchMemory {
        /// Free-text query.
        #[serde(default)]
        query: Option<String>,
        /// Kinds to search (`episodic`, `semantic`, `procedural`).
        #[serde(default)]
        types: Vec<String>,
        /// Tags that must all be present.
        #[serde(default)]
        tags: Vec<String>,
        /// Minimum importance.
        #[serde(default)]
        min_importance: Option<f32>,
        /// Minimum similarity for vector hits.
        #[serde(default)]
        min_similarity: Option<f32>,
        /// Maximum hits.
        #[serde(default)]
        limit: Option<usize>,
        /// Materialize embeddings on hits.
        #[serde(default)]
        include_embeddings: bool,
    },
    /// Lists the tools the agent may invoke.
    ListTools,
    /// Invokes a tool.
    #[serde(rename_all = "camelCase")]
    InvokeTool {
        /// Tool identifier.
        tool_id: String,
        /// JSON arguments.
        #[serde(default)]
        arguments: Value,
    },
    /// Lists agents across the cluster (or this node when standalone).
    DiscoverAgents,
    /// Returns the cluster agent directory with node ownership.
    AgentDirectory,
    /// Creates a forum.
    ForumCreate {
        /// Unique forum name.
        name: String,
        /// Optional description.
        #[serde(default)]
        description: Option<String>,
    },
    /// Lists forums.
    ForumList,
    /// Posts to a forum.
    #[serde(rename_all = "camelCase")]
    ForumPost {
        /// Target forum.
        forum_id: Uuid,
        /// Post body.
        content: String,
    },
    /// Lists a forum's posts.
    #[serde(rename_all = "camelCase")]
    ForumPosts {
        /// Target forum.
        forum_id: Uuid,
    },
    /// Posts a job.
    JobPost {
        /// Job title.
        title: String,
        /// Job description.
        description: String,
        /// Offered reward.
        #[serde(default)]
        reward: Option<String>,
    },
    /// Lists jobs.
    JobList,
    /// Applies to a job.
    #[serde(rename_all = "camelCase")]
    JobApply {
        /// Target job.
        job_id: Uuid,
        /// Optional pitch.
        #[serde(default)]
        note: Option<String>,
    },
    /// Returns an agent's reputation (defaults to the caller).
    #[serde(rename_all = "camelCase")]
    ReputationGet {
        /// Subject agent id; defaults to the caller.
        #[serde(default)]
        agent_id: Option<Uuid>,
    },
    /// Lists reputation records, best first.
    ReputationList,
    /// Adjusts an agent's reputation score.
    #[serde(rename_all = "camelCase")]
    ReputationAdjust {
        /// Subject agent.
        agent_id: Uuid,
        /// Signed delta; the score clamps to `0..=100`.
        delta: i32,
    },
    /// Queries the audit trail.
    #[serde(rename_all = "camelCase")]
    AuditQuery {
        /// Exact action match.
        #[serde(default)]
        action: Option<String>,
        /// Action prefix match.
        #[serde(default)]
        action_prefix: Option<String>,
        /// Restrict to one actor.
        #[serde(default)]
        actor_id: Option<String>,
        /// Maximum records.
        #[serde(default)]
        limit: Option<usize>,
    },
    /// Lists the caller's capability tokens.
    CapabilityList,
    /// Grants a capability token.
    #[serde(rename_all = "camelCase")]
    CapabilityGrant {
        /// Receiving agent; defaults to the caller.
        #[serde(default)]
        agent_id: Option<Uuid>,
        /// Capability category.
        category: String,
        /// Granted actions.
        actions: Vec<String>,
        /// Optional resource glob.
        #[serde(default)]
        resource: Option<String>,
        /// Purpose recorded with the token.
        #[serde(default)]
        purpose: Option<String>,
        /// Validity in milliseconds; clamped by the store.
        #[serde(default = "default_grant_duration")]
        duration_ms: i64,
        /// Whether the grant is delegatable.
        #[serde(default)]
        delegatable: bool,
    },
    /// Revokes one token.
    #[serde(rename_all = "camelCase")]
    CapabilityRevoke {
        /// Target token.
        token_id: Uuid,
    },
    /// Revokes every token of an agent.
    #[serde(rename_all = "camelCase")]
    CapabilityRevokeAll {
        /// Target agent; defaults to the caller.
        #[serde(default)]
        agent_id: Option<Uuid>,
    },
    /// Installs a governance policy.
    PolicyCreate {
        /// Policy name.
        name: String,
        /// Optional description.
        #[serde(default)]
        description: Option<String>,
        /// The rules.
        rules: Vec<GovernanceRule>,
    },
    /// Lists governance policies.
    PolicyList,
    /// Enables or disables a policy. Idempotent.
    #[serde(rename_all = "camelCase")]
    PolicySetStatus {
        /// Target policy.
        policy_id: Uuid,
        /// New status.
        status: PolicyStatus,
    },
    /// Opens a moderation case manually.
    #[serde(rename_all = "camelCase")]
    ModerationCaseOpen {
        /// Agent under review.
        subject: Uuid,
        /// Why the case was opened.
        reason: String,
    },
    /// Lists moderation cases.
    #[serde(rename_all = "camelCase")]
    ModerationCaseList {
        /// Restrict to one subject.
        #[serde(default)]
        subject: Option<Uuid>,
    },
    /// Closes a case, resolving its sanctions.
    #[serde(rename_all = "camelCase")]
    ModerationCaseResolve {
        /// Target case.
        case_id: Uuid,
        /// Resolution text.
        resolution: String,
    },
    /// Opens an appeal against a case.
    #[serde(rename_all = "camelCase")]
    AppealOpen {
        /// Appealed case.
        case_id: Uuid,
        /// Grounds for the appeal.
        reason: String,
    },
    /// Lists appeals.
    AppealList,
    /// Decides an appeal.
    #[serde(rename_all = "camelCase")]
    AppealResolve {
        /// Target appeal.
        appeal_id: Uuid,
        /// Decision: `resolved` lifts sanctions, `dismissed` keeps them.
        status: AppealStatus,
        /// Decision text.
        resolution: String,
    },
    /// Applies a sanction manually.
    #[serde(rename_all = "camelCase")]
    SanctionApply {
        /// Sanctioned agent.
        subject: Uuid,
        /// Sanction tier (`warn`, `throttle`, `quarantine`, `ban`).
        sanction_type: String,
        /// Optional details.
        #[serde(default)]
        reason: Option<String>,
    },
    /// Lists sanctions.
    #[serde(rename_all = "camelCase")]
    SanctionList {
        /// Restrict to one subject.
        #[serde(default)]
        subject: Option<Uuid>,
    },
    /// Lifts one sanction.
    #[serde(rename_all = "camelCase")]
    SanctionLift {
        /// Target sanction.
        sanction_id: Uuid,
    },
    /// Fire-and-forget cross-agent task.
    A2aTask {
        /// Target agent (external id or UUID).
        target: String,
        /// Delegated payload.
        task: Value,
    },
    /// Asynchronous cross-agent task; returns the task id.
    A2aTaskAsync {
        /// Target agent (external id or UUID).
        target: String,
        /// Delegated payload.
        task: Value,
    },
    /// Synchronous cross-agent task; waits for the result.
    #[serde(rename_all = "camelCase")]
    A2aTaskSync {
        /// Target agent (external id or UUID).
        target: String,
        /// Delegated payload.
        task: Value,
        /// Wait ceiling in milliseconds.
        #[serde(default = "default_sync_timeout_ms")]
        timeout_ms: u64,
    },
    /// Looks up a cross-agent task.
    #[serde(rename_all = "camelCase")]
    A2aTaskStatus {
        /// Target task.
        task_id: Uuid,
    },
    /// Lists an agent's declared skills.
    ListSkills {
        /// Target agent; defaults to the caller.
        #[serde(default)]
        target: Option<String>,
    },
    /// Invokes a declared skill on a peer synchronously.
    #[serde(rename_all = "camelCase")]
    InvokeSkill {
        /// Target agent (external id or UUID).
        target: String,
        /// Skill to invoke.
        skill_id: String,
        /// Skill input, validated against the declared schema.
        #[serde(default)]
        input: Value,
    },
    /// Learns a procedure.
    #[serde(rename_all = "camelCase")]
    StoreProcedure {
        /// Procedure name.
        name: String,
        /// Trigger description.
        trigger: String,
        /// Ordered steps.
        steps: Vec<String>,
        /// Optional inputs schema.
        #[serde(default)]
        inputs_schema: Option<Value>,
        /// Optional outputs schema.
        #[serde(default)]
        outputs_schema: Option<Value>,
    },
    /// Returns one procedure.
    #[serde(rename_all = "camelCase")]
    GetProcedure {
        /// Target procedure.
        procedure_id: Uuid,
    },
    /// Finds procedures by name or trigger.
    FindProcedures {
        /// Free-text query; empty lists all active procedures.
        #[serde(default)]
        query: String,
    },
    /// Folds an execution outcome into a procedure's statistics.
    #[serde(rename_all = "camelCase")]
    RecordProcedureExecution {
        /// Target procedure.
        procedure_id: Uuid,
        /// Whether the execution succeeded.
        success: bool,
    },
    /// CPU-bound utility task used by tests and benchmarks.
    Compute {
        /// Iterations of the inner loop.
        #[serde(default = "default_compute_iterations")]
        iterations: u64,
    },
    /// Memory-reporting utility task used by tests and benchmarks.
    #[serde(rename_all = "camelCase")]
    MemoryIntensive {
        /// Footprint to report in MiB.
        #[serde(default = "default_memory_mb")]
        size_mb: u64,
    },
}

fn default_fact_kind() -> String {
    "fact".into()
}

fn default_importance() -> f32 {
    0.5
}

const fn default_true() -> bool {
    true
}

const fn default_grant_duration() -> i64 {
    60 * 60 * 1000
}

const fn default_sync_timeout_ms() -> u64 {
    30_000
}

const fn default_compute_iterations() -> u64 {
    1000
}

const fn default_memory_mb() -> u64 {
    1
}

impl TaskPayload {
    /// Parses a raw payload, separating the task from its approval.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the payload is not an object with
    /// a string `type`, or `Unknown task type` for unrecognized tags.
    pub fn parse(raw: &Value) -> TaskResult<(Self, Option<ApprovalInfo>)> {
        let Some(object) = raw.as_object() else {
            return Err(TaskError::Validation("Task payload must be an object".into()));
        };
        let Some(task_type) = object.get("type").and_then(Value::as_str) else {
            return Err(TaskError::Validation(
                "Task payload must declare a string `type`".into(),
            ));
        };

        let approval = object
            .get("approval")
            .cloned()
            .map(serde_json::from_value::<ApprovalInfo>)
            .transpose()
            .map_err(|err| TaskError::Validation(format!("Invalid approval object: {err}")))?;

        let payload = serde_json::from_value::<Self>(raw.clone()).map_err(|err| {
            let message = err.to_string();
            if message.starts_with("unknown variant") {
                TaskError::Validation(format!("Unknown task type: {task_type}"))
            } else {
                TaskError::Validation(format!("Invalid `{task_type}` payload: {err}"))
            }
        })?;
        Ok((payload, approval))
    }

    /// Extracts the raw `type` tag without full validation. Used by the
    /// sanction gate, which runs before schema validation.
    #[must_use]
    pub fn raw_type(raw: &Value) -> Option<&str> {
        raw.get("type").and_then(Value::as_str)
    }

    /// Returns `true` for appeal operations, the only sanction-exempt
    /// dispatches.
    #[must_use]
    pub fn is_appeal_operation(task_type: &str) -> bool {
        task_type.starts_with("appeal_")
    }

    /// The dotted audit action recorded on success.
    #[must_use]
    pub const fn audit_action(&self) -> &'static str {
        match self {
            Self::Echo { .. } => "task.echo",
            Self::Chat { .. } => "llm.request",
            Self::StoreFact { .. } => "memory.write",
            Self::RecordEpisode { .. } => "memory.write",
            Self::SearchMemory { .. } => "memory.read",
            Self::ListTools => "tool.listed",
            Self::InvokeTool { .. } => "tool.invoked",
            Self::DiscoverAgents | Self::AgentDirectory => "agent.discovered",
            Self::ForumCreate { .. } => "forum.created",
            Self::ForumList | Self::ForumPosts { .. } => "forum.read",
            Self::ForumPost { .. } => "forum.posted",
            Self::JobPost { .. } => "job.posted",
            Self::JobList => "job.read",
            Self::JobApply { .. } => "job.applied",
            Self::ReputationGet { .. } | Self::ReputationList => "reputation.read",
            Self::ReputationAdjust { .. } => "reputation.adjusted",
            Self::AuditQuery { .. } => "audit.queried",
            Self::CapabilityList => "capability.listed",
            Self::CapabilityGrant { .. } => "capability.granted",
            Self::CapabilityRevoke { .. } | Self::CapabilityRevokeAll { .. } => {
                "capability.revoked"
            }
            Self::PolicyCreate { .. } => "policy.created",
            Self::PolicyList => "policy.listed",
            Self::PolicySetStatus { .. } => "policy.status_changed",
            Self::ModerationCaseOpen { .. } => "moderation.case_opened",
            Self::ModerationCaseList { .. } => "moderation.case_listed",
            Self::ModerationCaseResolve { .. } => "moderation.case_resolved",
            Self::AppealOpen { .. } => "appeal.opened",
            Self::AppealList => "appeal.listed",
            Self::AppealResolve { .. } => "appeal.resolved",
            Self::SanctionApply { .. } => "sanction.applied",
            Self::SanctionList { .. } => "sanction.listed",
            Self::SanctionLift { .. } => "sanction.lifted",
            Self::A2aTask { .. } | Self::A2aTaskAsync { .. } | Self::A2aTaskSync { .. } => {
                "a2a.task.submitted"
            }
            Self::A2aTaskStatus { .. } => "a2a.task.queried",
            Self::ListSkills { .. } => "skill.listed",
            Self::InvokeSkill { .. } => "a2a.task.submitted",
            Self::StoreProcedure { .. } => "memory.write",
            Self::GetProcedure { .. } | Self::FindProcedures { .. } => "memory.read",
            Self::RecordProcedureExecution { .. } => "memory.write",
            Self::Compute { .. } | Self::MemoryIntensive { .. } => "task.utility",
        }
    }

    /// The capability requirement gating this task, as
    /// `(category, action, resource)`.
    #[must_use]
    pub fn required_capability(&self) -> Option<(&'static str, &'static str, Option<String>)> {
        match self {
            Self::Chat { model, .. } => Some(("llm", "execute", model.clone())),
            Self::StoreFact { .. }
            | Self::RecordEpisode { .. }
            | Self::StoreProcedure { .. }
            | Self::RecordProcedureExecution { .. } => Some(("memory", "write", None)),
            Self::SearchMemory { .. } | Self::GetProcedure { .. } | Self::FindProcedures { .. } => {
                Some(("memory", "read", None))
            }
            Self::InvokeTool { tool_id, .. } => {
                Some(("tools", "invoke", Some(tool_id.clone())))
            }
            Self::A2aTask { target, .. }
            | Self::A2aTaskAsync { target, .. }
            | Self::A2aTaskSync { target, .. }
            | Self::InvokeSkill { target, .. } => {
                Some(("a2a", "delegate", Some(target.clone())))
            }
            Self::CapabilityGrant { .. }
            | Self::CapabilityRevoke { .. }
            | Self::PolicyCreate { .. }
            | Self::PolicySetStatus { .. }
            | Self::ModerationCaseOpen { .. }
            | Self::ModerationCaseResolve { .. }
            | Self::AppealResolve { .. }
            | Self::SanctionApply { .. }
            | Self::SanctionLift { .. }
            | Self::ReputationAdjust { .. } => Some(("governance", "manage", None)),
            _ => None,
        }
    }

    /// Whether this task consumes a request slot in the usage window.
    #[must_use]
    pub const fn consumes_request_slot(&self) -> bool {
        matches!(self, Self::Chat { .. } | Self::InvokeTool { .. })
    }
}

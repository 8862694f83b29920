//! Queue, validation, and background execution of cross-agent tasks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonschema::JSONSchema;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use warden_kernel::TaskScheduler;
use warden_primitives::{AgentId, SkillDescriptor, TaskId};
use warden_services::{EventBus, GatewayEvent};

use crate::task::{A2aTask, TaskStatus};
use crate::{A2aError, A2aResult};

const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
const DEFAULT_TASK_TTL: Duration = Duration::from_secs(15 * 60);
const JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// Target-side facts the engine needs before accepting a task.
#[derive(Debug, Clone)]
pub struct TargetProfile {
    /// Skills the target declares; empty means any payload is accepted.
    pub skills: Vec<SkillDescriptor>,
}

/// Dispatch seam: the engine validates targets and executes accepted
/// tasks through the gateway dispatcher.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Returns the target's profile.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::TargetNotFound`] or
    /// [`A2aError::TargetTerminated`].
    async fn validate_target(&self, target: AgentId) -> A2aResult<TargetProfile>;

    /// Runs `payload` as a task of `target`, preserving `from` as the
    /// delegating identity. The string error becomes the task's `error`.
    async fn execute(
        &self,
        target: AgentId,
        from: AgentId,
        payload: Value,
    ) -> Result<Value, String>;
}

/// Queue and state machine for cross-agent tasks.
pub struct A2aTaskEngine {
    tasks: RwLock<HashMap<TaskId, A2aTask>>,
    waiters: Mutex<HashMap<TaskId, oneshot::Sender<()>>>,
    executor: Arc<dyn TaskExecutor>,
    bus: Arc<dyn EventBus>,
    scheduler: TaskScheduler,
    task_ttl: Duration,
}

impl std::fmt::Debug for A2aTaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tasks = self.tasks.read().expect("a2a tasks poisoned");
        f.debug_struct("A2aTaskEngine")
            .field("tasks", &tasks.len())
            .finish_non_exhaustive()
    }
}

impl A2aTaskEngine {
    /// Creates an engine executing through `executor`.
    #[must_use]
    pub fn new(
        executor: Arc<dyn TaskExecutor>,
        bus: Arc<dyn EventBus>,
        scheduler: TaskScheduler,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            waiters: Mutex::new(HashMap::new()),
            executor,
            bus,
            scheduler,
            task_ttl: DEFAULT_TASK_TTL,
        }
    }

    /// Overrides the retention window for terminal tasks.
    #[must_use]
    pub const fn with_task_ttl(mut self, ttl: Duration) -> Self {
        self.task_ttl = ttl;
        self
    }

    /// Enqueues a task and returns its id immediately; execution
    /// continues in the background.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the target is unknown or
    /// terminated, the payload is over 1 MiB serialized, or the payload
    /// fails the target's declared skill contract.
    pub async fn submit(
        self: &Arc<Self>,
        from: AgentId,
        to: AgentId,
        payload: Value,
    ) -> A2aResult<TaskId> {
        let (task_id, _) = self.enqueue(from, to, payload).await?;
        Ok(task_id)
    }

    /// Enqueues a task and waits for its terminal status.
    ///
    /// # Errors
    ///
    /// Validation errors as for [`A2aTaskEngine::submit`], plus
    /// [`A2aError::Timeout`] when the task does not finish in time (the
    /// task itself keeps running).
    pub async fn submit_sync(
        self: &Arc<Self>,
        from: AgentId,
        to: AgentId,
        payload: Value,
        timeout: Duration,
    ) -> A2aResult<A2aTask> {
        let (task_id, done) = self.enqueue(from, to, payload).await?;
        match tokio::time::timeout(timeout, done).await {
            Ok(_) => self.status(task_id),
            Err(_) => Err(A2aError::Timeout),
        }
    }

    /// Returns a task's current state.
    ///
    /// # Errors
    ///
    /// Returns [`A2aError::TaskNotFound`] for unknown or swept ids.
    ///
    /// # Panics
    ///
    /// Panics if the task map lock has been poisoned.
    pub fn status(&self, task_id: TaskId) -> A2aResult<A2aTask> {
        let tasks = self.tasks.read().expect("a2a tasks poisoned");
        tasks.get(&task_id).cloned().ok_or(A2aError::TaskNotFound)
    }

    /// Removes terminal tasks older than the TTL, returning the count.
    ///
    /// # Panics
    ///
    /// Panics if the task map lock has been poisoned.
    pub fn sweep_expired(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.task_ttl).unwrap_or(chrono::Duration::zero());
        let mut tasks = self.tasks.write().expect("a2a tasks poisoned");
        let before = tasks.len();
        tasks.retain(|_, task| !(task.status.is_terminal() && task.updated_at <= cutoff));
        before - tasks.len()
    }

    /// Spawns the periodic janitor sweeping expired tasks.
    ///
    /// # Errors
    ///
    /// Returns a scheduler error when the scheduler is closed.
    pub fn start_janitor(self: &Arc<Self>) -> A2aResult<()> {
        let engine = Arc::clone(self);
        self.scheduler.spawn(async move {
            let mut ticker = tokio::time::interval(JANITOR_INTERVAL);
            loop {
                ticker.tick().await;
                let swept = engine.sweep_expired();
                if swept > 0 {
                    debug!(swept, "a2a janitor swept terminal tasks");
                }
            }
        })?;
        Ok(())
    }

    async fn enqueue(
        self: &Arc<Self>,
        from: AgentId,
        to: AgentId,
        payload: Value,
    ) -> A2aResult<(TaskId, oneshot::Receiver<()>)> {
        let profile = self.executor.validate_target(to).await?;
        validate_payload(&payload, &profile)?;

        let task = A2aTask::new(from, to, payload.clone());
        let task_id = task.task_id;
        {
            let mut tasks = self.tasks.write().expect("a2a tasks poisoned");
            tasks.insert(task_id, task);
        }
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().expect("a2a waiters poisoned");
            waiters.insert(task_id, done_tx);
        }
        self.publish(task_id, from, to, TaskStatus::Submitted);

        let engine = Arc::clone(self);
        self.scheduler.spawn(async move {
            engine.run_task(task_id, from, to, payload).await;
        })?;

        Ok((task_id, done_rx))
    }

    async fn run_task(self: Arc<Self>, task_id: TaskId, from: AgentId, to: AgentId, payload: Value) {
        if let Err(err) = self.set_status(task_id, TaskStatus::Working, None, None) {
            warn!(task_id = %task_id, error = %err, "a2a task vanished before start");
            return;
        }
        self.publish(task_id, from, to, TaskStatus::Working);

        match self.executor.execute(to, from, payload).await {
            Ok(result) => {
                if self
                    .set_status(task_id, TaskStatus::Completed, Some(result), None)
                    .is_ok()
                {
                    self.publish(task_id, from, to, TaskStatus::Completed);
                }
            }
            Err(message) => {
                if self
                    .set_status(task_id, TaskStatus::Failed, None, Some(message))
                    .is_ok()
                {
                    self.publish(task_id, from, to, TaskStatus::Failed);
                }
            }
        }

        let waiter = {
            let mut waiters = self.waiters.lock().expect("a2a waiters poisoned");
            waiters.remove(&task_id)
        };
        if let Some(done) = waiter {
            let _ = done.send(());
        }
    }

    fn set_status(
        &self,
        task_id: TaskId,
        to: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> A2aResult<()> {
        let mut tasks = self.tasks.write().expect("a2a tasks poisoned");
        let task = tasks.get_mut(&task_id).ok_or(A2aError::TaskNotFound)?;
        if !task.status.permits(to) {
            return Err(A2aError::InvalidTransition {
                from: task.status,
                to,
            });
        }
        task.status = to;
        task.result = result;
        task.error = error;
        task.updated_at = Utc::now();
        Ok(())
    }

    fn publish(&self, task_id: TaskId, from: AgentId, to: AgentId, status: TaskStatus) {
        self.bus.publish(GatewayEvent::new(
            "a2a",
            format!("a2a.task.{}", status.as_str()),
            json!({
                "taskId": task_id.to_string(),
                "fromAgentId": from.to_string(),
                "toAgentId": to.to_string(),
            }),
        ));
    }
}

fn validate_payload(payload: &Value, profile: &TargetProfile) -> A2aResult<()> {
    let size = serde_json::to_vec(payload).map(|b| b.len()).unwrap_or(0);
    if size > MAX_PAYLOAD_BYTES {
        return Err(A2aError::PayloadTooLarge {
            size,
            limit: MAX_PAYLOAD_BYTES,
        });
    }

    if profile.skills.is_empty() {
        return Ok(());
    }

    let requested = payload
        .get("skillId")
        .or_else(|| payload.get("type"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let Some(skill) = profile.skills.iter().find(|s| s.id() == requested) else {
        return Err(A2aError::UnknownSkill { skill: requested });
    };

    if let Some(schema) = skill.input_schema() {
        let compiled = JSONSchema::compile(schema).map_err(|err| A2aError::SchemaViolation {
            skill: requested.clone(),
            reason: err.to_string(),
        })?;
        if let Err(mut errors) = compiled.validate(payload) {
            let reason = errors
                .next()
                .map_or_else(|| "schema violation".to_owned(), |err| err.to_string());
            return Err(A2aError::SchemaViolation {
                skill: requested,
                reason,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_services::BroadcastBus;

    struct StaticExecutor {
        skills: Vec<SkillDescriptor>,
        fail: bool,
    }

    #[async_trait]
    impl TaskExecutor for StaticExecutor {
        async fn validate_target(&self, _target: AgentId) -> A2aResult<TargetProfile> {
            Ok(TargetProfile {
                skills: self.skills.clone(),
            })
        }

        async fn execute(
            &self,
            _target: AgentId,
            _from: AgentId,
            payload: Value,
        ) -> Result<Value, String> {
            if self.fail {
                Err("executor refused".into())
            } else {
                Ok(payload)
            }
        }
    }

    fn engine(executor: StaticExecutor) -> Arc<A2aTaskEngine> {
        Arc::new(A2aTaskEngine::new(
            Arc::new(executor),
            Arc::new(BroadcastBus::default()),
            TaskScheduler::default(),
        ))
    }

    #[tokio::test]
    async fn sync_round_trip_echoes_payload() {
        let engine = engine(StaticExecutor {
            skills: vec![],
            fail: false,
        });
        let payload = json!({"type": "echo", "content": "hello"});
        let task = engine
            .submit_sync(
                AgentId::random(),
                AgentId::random(),
                payload.clone(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(payload));
    }

    #[tokio::test]
    async fn lifecycle_events_arrive_in_order() {
        let bus = Arc::new(BroadcastBus::default());
        let engine = Arc::new(A2aTaskEngine::new(
            Arc::new(StaticExecutor {
                skills: vec![],
                fail: false,
            }),
            bus.clone(),
            TaskScheduler::default(),
        ));
        let mut rx = bus.subscribe();

        engine
            .submit_sync(
                AgentId::random(),
                AgentId::random(),
                json!({"type": "echo"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.event_type);
        }
        assert_eq!(
            seen,
            vec!["a2a.task.submitted", "a2a.task.working", "a2a.task.completed"]
        );
    }

    #[tokio::test]
    async fn failures_surface_in_status() {
        let engine = engine(StaticExecutor {
            skills: vec![],
            fail: true,
        });
        let task = engine
            .submit_sync(
                AgentId::random(),
                AgentId::random(),
                json!({"type": "echo"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("executor refused"));
    }

    #[tokio::test]
    async fn declared_skills_gate_payloads() {
        let skill = SkillDescriptor::new("summarize", "Summarize")
            .unwrap()
            .with_input_schema(json!({
                "type": "object",
                "required": ["text"],
                "properties": {"text": {"type": "string"}}
            }));
        let engine = engine(StaticExecutor {
            skills: vec![skill],
            fail: false,
        });
        let from = AgentId::random();
        let to = AgentId::random();

        let err = engine
            .submit(from, to, json!({"type": "unknown_skill"}))
            .await
            .expect_err("skill not declared");
        assert!(matches!(err, A2aError::UnknownSkill { .. }));

        let err = engine
            .submit(from, to, json!({"skillId": "summarize"}))
            .await
            .expect_err("schema requires text");
        assert!(matches!(err, A2aError::SchemaViolation { .. }));

        engine
            .submit(from, to, json!({"skillId": "summarize", "text": "hi"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn oversized_payload_rejected() {
        let engine = engine(StaticExecutor {
            skills: vec![],
            fail: false,
        });
        let blob = "x".repeat(MAX_PAYLOAD_BYTES + 1);
        let err = engine
            .submit(AgentId::random(), AgentId::random(), json!({"blob": blob}))
            .await
            .expect_err("too large");
        assert!(matches!(err, A2aError::PayloadTooLarge { .. }));
    }

    #[tokio::test]
    async fn status_query_and_sweep() {
        let engine = Arc::new(
            A2aTaskEngine::new(
                Arc::new(StaticExecutor {
                    skills: vec![],
                    fail: false,
                }),
                Arc::new(BroadcastBus::default()),
                TaskScheduler::default(),
            )
            .with_task_ttl(Duration::ZERO),
        );

        let task = engine
            .submit_sync(
                AgentId::random(),
                AgentId::random(),
                json!({"type": "echo"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert!(engine.status(task.task_id).is_ok());
        assert_eq!(engine.sweep_expired(), 1);
        assert!(matches!(
            engine.status(task.task_id),
            Err(A2aError::TaskNotFound)
        ));
    }
}

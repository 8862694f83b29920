//! Periodic per-agent health evaluation and anomaly detection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use warden_primitives::AgentId;
use warden_services::{EventBus, GatewayEvent};

use crate::entry::AgentSnapshot;
use crate::lifecycle::AgentState;
use crate::registry::AgentRegistry;
use crate::scheduler::{SchedulerResult, TaskScheduler};

const ANOMALY_WINDOW: usize = 20;
const ANOMALY_MIN_SAMPLES: usize = 10;
const ANOMALY_SIGMA: f64 = 2.0;

/// Overall status of one health evaluation. Ordered worst-last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All checks nominal.
    Healthy,
    /// At least one check crossed its warning threshold.
    Degraded,
    /// At least one check crossed its critical threshold.
    Unhealthy,
    /// The agent is faulted or past hard limits.
    Critical,
}

impl HealthStatus {
    /// Returns the canonical wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Critical => "critical",
        }
    }
}

/// One named check within a health evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Check name (`state`, `token_usage`, `memory`, `cost`, `idle`,
    /// `error_rate`).
    pub name: &'static str,
    /// Status of this check.
    pub status: HealthStatus,
    /// Observed value the thresholds were compared against.
    pub value: f64,
}

/// Result of evaluating one agent.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    /// Evaluated agent.
    pub agent_id: AgentId,
    /// Worst-of status across checks.
    pub status: HealthStatus,
    /// The individual checks.
    pub checks: Vec<HealthCheck>,
}

/// Warning/critical thresholds for the individual checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthThresholds {
    /// Token-window ratio warning level.
    pub token_warn: f64,
    /// Token-window ratio critical level.
    pub token_critical: f64,
    /// Memory ratio warning level.
    pub memory_warn: f64,
    /// Memory ratio critical level.
    pub memory_critical: f64,
    /// Cost-budget ratio warning level.
    pub cost_warn: f64,
    /// Cost-budget ratio critical level.
    pub cost_critical: f64,
    /// Idle-time warning level in seconds.
    pub idle_warn_secs: u64,
    /// Idle-time critical level in seconds.
    pub idle_critical_secs: u64,
    /// Error-rate warning level.
    pub error_rate_warn: f64,
    /// Error-rate critical level.
    pub error_rate_critical: f64,
    /// Consecutive-error ceiling; reaching it is critical.
    pub max_consecutive_errors: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            token_warn: 0.7,
            token_critical: 0.9,
            memory_warn: 0.7,
            memory_critical: 0.9,
            cost_warn: 0.8,
            cost_critical: 0.95,
            idle_warn_secs: 300,
            idle_critical_secs: 3600,
            error_rate_warn: 0.1,
            error_rate_critical: 0.3,
            max_consecutive_errors: 5,
        }
    }
}

fn grade(value: f64, warn: f64, critical: f64) -> HealthStatus {
    if value >= critical {
        HealthStatus::Unhealthy
    } else if value >= warn {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Direction of a detected token-usage anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Usage jumped above the rolling band.
    Spike,
    /// Usage fell below the rolling band.
    Drop,
}

#[derive(Debug, Default)]
struct AnomalyDetector {
    samples: VecDeque<f64>,
}

impl AnomalyDetector {
    /// Feeds one reading; returns a detection before absorbing it.
    fn observe(&mut self, value: f64) -> Option<AnomalyKind> {
        let detection = if self.samples.len() >= ANOMALY_MIN_SAMPLES {
            let n = self.samples.len() as f64;
            let mean = self.samples.iter().sum::<f64>() / n;
            let variance = self
                .samples
                .iter()
                .map(|sample| (sample - mean).powi(2))
                .sum::<f64>()
                / n;
            let sigma = variance.sqrt();
            if sigma > 0.0 && (value - mean).abs() > ANOMALY_SIGMA * sigma {
                Some(if value > mean {
                    AnomalyKind::Spike
                } else {
                    AnomalyKind::Drop
                })
            } else {
                None
            }
        } else {
            None
        };

        self.samples.push_back(value);
        if self.samples.len() > ANOMALY_WINDOW {
            self.samples.pop_front();
        }
        detection
    }
}

/// Evaluates agent health on an interval and publishes status changes.
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    bus: Arc<dyn EventBus>,
    thresholds: HealthThresholds,
    detectors: Mutex<HashMap<AgentId, AnomalyDetector>>,
    last_status: Mutex<HashMap<AgentId, HealthStatus>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Creates a monitor over the supplied registry and bus.
    #[must_use]
    pub fn new(
        registry: Arc<AgentRegistry>,
        bus: Arc<dyn EventBus>,
        thresholds: HealthThresholds,
    ) -> Self {
        Self {
            registry,
            bus,
            thresholds,
            detectors: Mutex::new(HashMap::new()),
            last_status: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluates one agent snapshot.
    #[must_use]
    pub fn evaluate(&self, snapshot: &AgentSnapshot) -> HealthCheckResult {
        let t = &self.thresholds;
        let mut checks = Vec::with_capacity(6);

        let state_status = match snapshot.state {
            AgentState::Error => HealthStatus::Critical,
            AgentState::Terminated => HealthStatus::Unhealthy,
            _ => HealthStatus::Healthy,
        };
        checks.push(HealthCheck {
            name: "state",
            status: state_status,
            value: 0.0,
        });

        let token_ratio = if snapshot.limits.tokens_per_minute == 0 {
            0.0
        } else {
            snapshot.usage.tokens_this_minute as f64 / snapshot.limits.tokens_per_minute as f64
        };
        checks.push(HealthCheck {
            name: "token_usage",
            status: grade(token_ratio, t.token_warn, t.token_critical),
            value: token_ratio,
        });

        let memory_ratio = if snapshot.limits.max_memory_mb == 0 {
            0.0
        } else {
            snapshot.memory_usage_mb as f64 / snapshot.limits.max_memory_mb as f64
        };
        checks.push(HealthCheck {
            name: "memory",
            status: grade(memory_ratio, t.memory_warn, t.memory_critical),
            value: memory_ratio,
        });

        let cost_ratio = if snapshot.limits.cost_budget_usd <= 0.0 {
            0.0
        } else {
            snapshot.cumulative_cost / snapshot.limits.cost_budget_usd
        };
        checks.push(HealthCheck {
            name: "cost",
            status: grade(cost_ratio, t.cost_warn, t.cost_critical),
            value: cost_ratio,
        });

        let idle_secs = (Utc::now() - snapshot.last_active_at).num_seconds().max(0) as f64;
        checks.push(HealthCheck {
            name: "idle",
            status: grade(idle_secs, t.idle_warn_secs as f64, t.idle_critical_secs as f64),
            value: idle_secs,
        });

        let error_status = if snapshot.consecutive_errors >= t.max_consecutive_errors {
            HealthStatus::Critical
        } else {
            grade(snapshot.error_rate, t.error_rate_warn, t.error_rate_critical)
        };
        checks.push(HealthCheck {
            name: "error_rate",
            status: error_status,
            value: snapshot.error_rate,
        });

        let status = checks
            .iter()
            .map(|check| check.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        HealthCheckResult {
            agent_id: snapshot.id,
            status,
            checks,
        }
    }

    /// Feeds a token-usage reading into the agent's anomaly detector and
    /// publishes a detection, if any.
    ///
    /// # Panics
    ///
    /// Panics if the detector lock has been poisoned.
    pub fn observe_token_usage(&self, agent_id: AgentId, tokens: u64) -> Option<AnomalyKind> {
        let detection = {
            let mut detectors = self.detectors.lock().expect("detectors poisoned");
            detectors
                .entry(agent_id)
                .or_default()
                .observe(tokens as f64)
        };
        if let Some(kind) = detection {
            info!(agent_id = %agent_id, ?kind, tokens, "token usage anomaly");
            self.bus.publish(GatewayEvent::new(
                "alerts",
                "health.anomaly",
                json!({
                    "agentId": agent_id.to_string(),
                    "kind": match kind {
                        AnomalyKind::Spike => "spike",
                        AnomalyKind::Drop => "drop",
                    },
                    "tokens": tokens,
                }),
            ));
        }
        detection
    }

    /// Runs one monitor tick: evaluate every agent, publish transitions,
    /// sweep terminated entries past their grace period.
    ///
    /// # Panics
    ///
    /// Panics if a monitor lock has been poisoned.
    pub fn tick(&self) {
        for snapshot in self.registry.snapshots() {
            let result = self.evaluate(&snapshot);
            let previous = {
                let mut last = self.last_status.lock().expect("status map poisoned");
                last.insert(snapshot.id, result.status)
            };
            if previous != Some(result.status) {
                debug!(
                    agent_id = %snapshot.id,
                    status = result.status.as_str(),
                    "health status changed"
                );
                self.bus.publish(GatewayEvent::new(
                    "events",
                    "health.status_changed",
                    json!({
                        "agentId": snapshot.id.to_string(),
                        "status": result.status.as_str(),
                        "checks": result.checks,
                    }),
                ));
            }
        }

        for swept in self.registry.sweep_terminated() {
            let mut last = self.last_status.lock().expect("status map poisoned");
            last.remove(&swept);
            let mut detectors = self.detectors.lock().expect("detectors poisoned");
            detectors.remove(&swept);
        }
    }

    /// Spawns the periodic monitor loop on the scheduler.
    ///
    /// # Errors
    ///
    /// Returns a scheduler error when the scheduler is closed.
    pub fn start(
        self: Arc<Self>,
        scheduler: &TaskScheduler,
        interval: Duration,
    ) -> SchedulerResult<tokio::task::JoinHandle<()>> {
        scheduler.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_primitives::{AgentLimits, AgentManifest};
    use warden_services::BroadcastBus;

    fn monitor() -> (Arc<AgentRegistry>, HealthMonitor) {
        let registry = Arc::new(AgentRegistry::new());
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            Arc::new(BroadcastBus::default()),
            HealthThresholds::default(),
        );
        (registry, monitor)
    }

    fn admit(registry: &AgentRegistry, limits: AgentLimits) -> AgentId {
        let manifest = AgentManifest::builder("worker")
            .name("Worker")
            .unwrap()
            .version("1.0")
            .unwrap()
            .limits(limits)
            .build()
            .unwrap();
        registry.admit(manifest, None).unwrap()
    }

    #[test]
    fn worst_of_determines_status() {
        let (registry, monitor) = monitor();
        let id = admit(&registry, AgentLimits::default().with_tokens_per_minute(100));
        let entry = registry.get(id).unwrap();
        {
            let mut entry = entry.lock().unwrap();
            entry.usage.tokens_this_minute = 95;
        }

        let snapshot = registry.snapshot(id).unwrap();
        let result = monitor.evaluate(&snapshot);
        assert_eq!(result.status, HealthStatus::Unhealthy);
        let token_check = result
            .checks
            .iter()
            .find(|check| check.name == "token_usage")
            .unwrap();
        assert_eq!(token_check.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn consecutive_errors_are_critical() {
        let (registry, monitor) = monitor();
        let id = admit(&registry, AgentLimits::default());
        let entry = registry.get(id).unwrap();
        {
            let mut entry = entry.lock().unwrap();
            for _ in 0..5 {
                entry.record_task_outcome(false);
            }
        }

        let snapshot = registry.snapshot(id).unwrap();
        assert_eq!(monitor.evaluate(&snapshot).status, HealthStatus::Critical);
    }

    #[test]
    fn anomaly_detector_flags_spike_and_drop() {
        let mut detector = AnomalyDetector::default();
        for _ in 0..12 {
            assert!(detector.observe(100.0).is_none());
        }
        // Perfectly flat history has zero sigma; nudge in some variance.
        detector.observe(104.0);
        detector.observe(96.0);
        assert_eq!(detector.observe(200.0), Some(AnomalyKind::Spike));
        assert_eq!(detector.observe(1.0), Some(AnomalyKind::Drop));
    }

    #[test]
    fn too_few_samples_never_flag() {
        let mut detector = AnomalyDetector::default();
        for value in [1.0, 100.0, 1.0, 100.0, 1.0] {
            assert!(detector.observe(value).is_none());
        }
    }

    #[tokio::test]
    async fn tick_publishes_status_transitions_once() {
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(BroadcastBus::default());
        let monitor = HealthMonitor::new(
            Arc::clone(&registry),
            bus.clone(),
            HealthThresholds::default(),
        );
        let id = admit(&registry, AgentLimits::default().with_tokens_per_minute(100));

        let mut rx = bus.subscribe();
        monitor.tick();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.event_type, "health.status_changed");

        // Unchanged status publishes nothing further.
        monitor.tick();
        assert!(rx.try_recv().is_err());

        let entry = registry.get(id).unwrap();
        entry.lock().unwrap().usage.tokens_this_minute = 95;
        monitor.tick();
        let second = rx.recv().await.unwrap();
        assert_eq!(second.payload["status"], "unhealthy");
    }
}

//! Agent lifecycle kernel for the Warden gateway.
//!
//! The registry owns one entry per hosted agent; entries carry the
//! manifest, lifecycle state, sliding usage window, and cumulative cost.
//! All gates and accounting for one agent serialize on that agent's
//! entry lock while different agents progress in parallel.

#![warn(missing_docs, clippy::pedantic)]

mod entry;
mod health;
mod lifecycle;
mod registry;
mod scheduler;
mod usage;

pub use entry::{AgentEntry, AgentSnapshot, ErrorWindow, UsageWindow};
pub use health::{
    AnomalyKind, HealthCheck, HealthCheckResult, HealthMonitor, HealthStatus, HealthThresholds,
};
pub use lifecycle::{AgentState, StateError};
pub use registry::{AgentRegistry, LifecycleChange, RegistryError, RegistryResult};
pub use scheduler::{SchedulerConfig, SchedulerError, SchedulerResult, TaskScheduler};
pub use usage::{
    apply_usage, check_cost_budget, check_token_rate, consume_request, consume_tool_call,
    rollback_request, rollback_tool_call, CostTable, ModelRate, RateLimitKind, UsageDelta,
};

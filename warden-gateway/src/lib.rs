//! The Warden gateway.
//!
//! All agent traffic enters here and all side effects flow out of here.
//! The dispatcher runs every typed task through the gate chain
//! (sanctions, state, schema, approval, permission, rate, budget, input
//! safety), executes it against the component crates, folds usage back
//! into the agent's window, and records the audit trail that feeds the
//! governance loop. The connection surface exposes the framed WebSocket
//! protocol plus the health and metrics HTTP endpoints.

#![warn(missing_docs, clippy::pedantic)]

mod cluster;
mod config;
mod dispatch;
mod error;
mod gateway;
mod http;
mod surface;
mod task;

pub use cluster::ClusterSync;
pub use config::{GatewayConfig, ListSetting};
pub use dispatch::{DispatchOptions, Dispatcher, DispatcherSeed};
pub use error::{TaskError, TaskResult};
pub use gateway::{ExternalServices, Gateway, GatewayError};
pub use http::HealthSummary;
pub use surface::router;
pub use task::{ApprovalInfo, TaskPayload};

//! Health and metrics HTTP endpoints.

use std::fmt::Write as _;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::gateway::Gateway;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Body served by `/health` and `/healthz`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    /// Overall status: `ok` or `error`.
    pub status: String,
    /// Registered provider identifiers.
    pub providers: Vec<String>,
    /// Hosted agent count.
    pub agents: usize,
    /// Live connection count.
    pub connections: usize,
    /// Seconds since start.
    pub uptime: u64,
    /// Current server time.
    pub timestamp: String,
    /// Gateway version.
    pub version: &'static str,
}

impl HealthSummary {
    fn gather(gateway: &Gateway) -> Self {
        let providers = gateway.router().provider_ids();
        let status = if providers.is_empty() { "error" } else { "ok" };
        Self {
            status: status.to_owned(),
            providers,
            agents: gateway.registry().len(),
            connections: gateway.connections(),
            uptime: gateway.uptime_seconds(),
            timestamp: Utc::now().to_rfc3339(),
            version: VERSION,
        }
    }
}

/// `GET /health` and `GET /healthz`.
pub async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    let summary = HealthSummary::gather(&gateway);
    let code = if summary.status == "error" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(summary)).into_response()
}

/// `GET /ready` and `GET /readiness`: ready iff status is not `error`
/// and at least one provider is registered.
pub async fn ready(State(gateway): State<Arc<Gateway>>) -> Response {
    let summary = HealthSummary::gather(&gateway);
    let ready = summary.status != "error" && !summary.providers.is_empty();
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(serde_json::json!({"ready": ready}))).into_response()
}

/// `GET /live` and `GET /liveness`.
pub async fn live() -> Response {
    (StatusCode::OK, Json(serde_json::json!({"alive": true}))).into_response()
}

/// `GET /metrics`: Prometheus text exposition v0.0.4.
pub async fn metrics(State(gateway): State<Arc<Gateway>>) -> Response {
    let summary = HealthSummary::gather(&gateway);
    let up = u8::from(summary.status != "error");

    let mut body = String::new();
    let _ = writeln!(body, "# HELP up Whether the gateway is serving.");
    let _ = writeln!(body, "# TYPE up gauge");
    let _ = writeln!(body, "up {up}");
    let _ = writeln!(body, "# HELP uptime_seconds Seconds since gateway start.");
    let _ = writeln!(body, "# TYPE uptime_seconds counter");
    let _ = writeln!(body, "uptime_seconds {}", summary.uptime);
    let _ = writeln!(body, "# HELP providers_total Registered LLM providers.");
    let _ = writeln!(body, "# TYPE providers_total gauge");
    let _ = writeln!(body, "providers_total {}", summary.providers.len());
    let _ = writeln!(body, "# HELP agents_total Hosted agents.");
    let _ = writeln!(body, "# TYPE agents_total gauge");
    let _ = writeln!(body, "agents_total {}", summary.agents);
    let _ = writeln!(body, "# HELP connections_total Live client connections.");
    let _ = writeln!(body, "# TYPE connections_total gauge");
    let _ = writeln!(body, "connections_total {}", summary.connections);

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::gateway::ExternalServices;

    fn gateway() -> Arc<Gateway> {
        Gateway::new(
            GatewayConfig {
                auth_token: "secret".into(),
                ..GatewayConfig::default()
            },
            ExternalServices::in_memory(),
        )
        .unwrap()
    }

    #[test]
    fn summary_reports_providers() {
        let gateway = gateway();
        let summary = HealthSummary::gather(&gateway);
        assert_eq!(summary.status, "ok");
        assert_eq!(summary.providers, vec!["echo".to_owned()]);
        assert_eq!(summary.agents, 0);
    }

    #[tokio::test]
    async fn metrics_exposition_contains_gauges() {
        let gateway = gateway();
        let response = metrics(State(gateway)).await;
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("up 1"));
        assert!(text.contains("providers_total 1"));
        assert!(text.contains("agents_total 0"));
        assert!(text.contains("connections_total 0"));
    }
}

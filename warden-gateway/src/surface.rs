//! Framed WebSocket connection surface.
//!
//! Clients send `{type, id?, payload?}` frames. The first frame must be
//! `auth`; afterwards the connection can spawn and terminate agents,
//! subscribe to event channels, chat directly with the LLM router
//! (optionally streamed), and dispatch agent tasks through the gate
//! chain.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{any, get};
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use warden_primitives::{AgentId, AgentManifest};
use warden_services::{ChatMessage, ChatRole, EventBus, GatewayEvent, LlmChunk, LlmRequest};
use warden_policy::{InputSanitizer, SanitizeContext};

use crate::dispatch::DispatchOptions;
use crate::error::{TaskError, TaskResult};
use crate::gateway::Gateway;
use crate::http;

const OUTBOUND_BUFFER: usize = 256;

/// Builds the combined WS + HTTP router.
#[must_use]
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/ws", any(ws_handler))
        .route("/health", get(http::health))
        .route("/healthz", get(http::health))
        .route("/ready", get(http::ready))
        .route("/readiness", get(http::ready))
        .route("/live", get(http::live))
        .route("/liveness", get(http::live))
        .route("/metrics", get(http::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<Gateway>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Value,
}

fn frame(frame_type: &str, id: Option<&str>, payload: Value) -> String {
    json!({"type": frame_type, "id": id, "payload": payload}).to_string()
}

fn error_frame(id: Option<&str>, err: &TaskError) -> String {
    frame(
        "error",
        id,
        json!({"status": "error", "error": err.to_string(), "code": err.code()}),
    )
}

struct Connection {
    gateway: Arc<Gateway>,
    subscriptions: HashSet<String>,
    out: mpsc::Sender<String>,
    window_start: Instant,
    window_count: u32,
}

impl Connection {
    fn rate_limited(&mut self) -> bool {
        if self.window_start.elapsed().as_secs() >= 1 {
            self.window_start = Instant::now();
            self.window_count = 0;
        }
        self.window_count += 1;
        self.window_count > self.gateway.config().messages_per_second
    }

    fn subscribed_to(&self, event: &GatewayEvent) -> bool {
        self.subscriptions.iter().any(|sub| {
            sub == "*"
                || sub == &event.channel
                || sub
                    .strip_suffix(".*")
                    .is_some_and(|prefix| {
                        event.channel == prefix || event.event_type.starts_with(prefix)
                    })
        })
    }
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    gateway.connection_opened();
    run_socket(socket, Arc::clone(&gateway)).await;
    gateway.connection_closed();
}

async fn run_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    // Single writer owns the sink; all producers feed the bounded
    // channel, and a full channel drops the connection rather than
    // stalling producers.
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    if !authenticate(&mut ws_rx, &out_tx, &gateway).await {
        drop(out_tx);
        let _ = writer.await;
        return;
    }

    let mut connection = Connection {
        gateway: Arc::clone(&gateway),
        subscriptions: HashSet::new(),
        out: out_tx.clone(),
        window_start: Instant::now(),
        window_count: 0,
    };
    let mut events = gateway.bus().subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if connection.subscribed_to(&event) {
                            let text = frame("event", None, json!(event));
                            if connection.out.try_send(text).is_err() {
                                debug!("subscriber stalled; dropping connection");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "subscriber lagged; dropping connection");
                        break;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_frame(&mut connection, text.as_str()).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    drop(connection);
    drop(out_tx);
    let _ = writer.await;
}

async fn authenticate(
    ws_rx: &mut futures::stream::SplitStream<WebSocket>,
    out: &mpsc::Sender<String>,
    gateway: &Gateway,
) -> bool {
    let Some(Ok(Message::Text(text))) = ws_rx.next().await else {
        return false;
    };
    let Ok(first) = serde_json::from_str::<InboundFrame>(text.as_str()) else {
        let _ = out.send(error_frame(None, &TaskError::AuthRequired)).await;
        return false;
    };
    if first.frame_type != "auth" {
        let _ = out
            .send(frame("auth_required", first.id.as_deref(), Value::Null))
            .await;
        return false;
    }

    let presented = first
        .payload
        .get("token")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let expected = &gateway.config().auth_token;
    let matches = !expected.is_empty()
        && presented.len() == expected.len()
        && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()));
    if matches {
        let _ = out
            .send(frame("auth_success", first.id.as_deref(), Value::Null))
            .await;
        true
    } else {
        let _ = out
            .send(frame("auth_failed", first.id.as_deref(), Value::Null))
            .await;
        false
    }
}

/// Handles one authenticated frame. Returns `false` to drop the
/// connection.
async fn handle_frame(connection: &mut Connection, text: &str) -> bool {
    if text.len() > connection.gateway.config().max_frame_bytes {
        let err = TaskError::Validation("Frame exceeds maximum size".into());
        return connection.out.send(error_frame(None, &err)).await.is_ok();
    }
    if connection.rate_limited() {
        let err = TaskError::RateLimited(warden_kernel::RateLimitKind::Requests);
        return connection.out.send(error_frame(None, &err)).await.is_ok();
    }

    let parsed = match serde_json::from_str::<InboundFrame>(text) {
        Ok(parsed) => parsed,
        Err(err) => {
            let err = TaskError::Validation(format!("Invalid frame: {err}"));
            return connection.out.send(error_frame(None, &err)).await.is_ok();
        }
    };
    let id = parsed.id.clone();

    let reply = match parsed.frame_type.as_str() {
        "spawn_agent" => spawn_agent(connection, parsed.payload).await,
        "terminate_agent" => terminate_agent(connection, &parsed.payload).await,
        "list_agents" => Ok(json!({
            "agents": connection.gateway.registry().snapshots(),
        })),
        "agent_status" => agent_status(connection, &parsed.payload),
        "subscribe" => {
            update_subscriptions(&mut connection.subscriptions, &parsed.payload, true)
        }
        "unsubscribe" => {
            update_subscriptions(&mut connection.subscriptions, &parsed.payload, false)
        }
        "chat" => {
            return direct_chat(connection, id.as_deref(), parsed.payload).await;
        }
        "task" => dispatch_task(connection, id.as_deref(), parsed.payload).await,
        other => Err(TaskError::Validation(format!("Unknown frame type: {other}"))),
    };

    let text = match reply {
        Ok(payload) => frame("response", id.as_deref(), payload),
        Err(err) => error_frame(id.as_deref(), &err),
    };
    connection.out.send(text).await.is_ok()
}

async fn spawn_agent(connection: &Connection, payload: Value) -> TaskResult<Value> {
    let manifest: AgentManifest = serde_json::from_value(payload)
        .map_err(|err| TaskError::Validation(format!("Invalid manifest: {err}")))?;
    let id = connection.gateway.spawn_agent(manifest).await?;
    Ok(json!({"agentId": id}))
}

async fn terminate_agent(connection: &Connection, payload: &Value) -> TaskResult<Value> {
    let agent_id = parse_agent_id(payload)?;
    connection.gateway.terminate_agent(agent_id).await?;
    Ok(json!({"terminated": true}))
}

fn agent_status(connection: &Connection, payload: &Value) -> TaskResult<Value> {
    let agent_id = parse_agent_id(payload)?;
    let snapshot = connection
        .gateway
        .registry()
        .snapshot(agent_id)
        .ok_or_else(|| TaskError::NotFound("agent".into()))?;
    let health = connection.gateway.health().evaluate(&snapshot);
    Ok(json!({"agent": snapshot, "health": health}))
}

fn parse_agent_id(payload: &Value) -> TaskResult<AgentId> {
    let raw = payload
        .get("agentId")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::Validation("Missing `agentId`".into()))?;
    AgentId::from_str(raw).map_err(|_| TaskError::Validation("Invalid `agentId`".into()))
}

fn update_subscriptions(
    subscriptions: &mut HashSet<String>,
    payload: &Value,
    add: bool,
) -> TaskResult<Value> {
    let channels = payload
        .get("channels")
        .and_then(Value::as_array)
        .ok_or_else(|| TaskError::Validation("Missing `channels` array".into()))?;
    for channel in channels.iter().filter_map(Value::as_str) {
        if add {
            subscriptions.insert(channel.to_owned());
        } else {
            subscriptions.remove(channel);
        }
    }
    Ok(json!({"subscriptions": subscriptions.iter().collect::<Vec<_>>()}))
}

async fn dispatch_task(
    connection: &Connection,
    id: Option<&str>,
    payload: Value,
) -> TaskResult<Value> {
    let agent_id = parse_agent_id(&payload)?;
    let task = payload
        .get("task")
        .ok_or_else(|| TaskError::Validation("Missing `task` object".into()))?;

    let wants_stream = task.get("type").and_then(Value::as_str) == Some("chat")
        && task.get("stream").and_then(Value::as_bool) == Some(true);
    if !wants_stream {
        let result = connection
            .gateway
            .dispatcher()
            .dispatch(agent_id, task, DispatchOptions::default())
            .await?;
        return Ok(json!({"status": "ok", "result": result}));
    }

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<LlmChunk>(OUTBOUND_BUFFER);
    let out = connection.out.clone();
    let stream_id = id.map(ToOwned::to_owned);
    let forwarder = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            let text = frame(
                "chat_stream",
                stream_id.as_deref(),
                json!({"delta": chunk.delta}),
            );
            if out.try_send(text).is_err() {
                break;
            }
        }
    });

    let result = connection
        .gateway
        .dispatcher()
        .dispatch(
            agent_id,
            task,
            DispatchOptions {
                chunk_sink: Some(chunk_tx),
                delegated_from: None,
            },
        )
        .await;
    let _ = forwarder.await;

    let end = match &result {
        Ok(result) => frame("chat_stream_end", id, result.clone()),
        Err(err) => frame(
            "chat_stream_end",
            id,
            json!({"error": err.to_string(), "code": err.code()}),
        ),
    };
    let _ = connection.out.send(end).await;
    result.map(|_| json!({"status": "ok", "streamed": true}))
}

/// Direct LLM chat for operator connections, outside any agent budget.
/// Returns `false` to drop the connection.
async fn direct_chat(connection: &Connection, id: Option<&str>, payload: Value) -> bool {
    let result = direct_chat_inner(connection, id, payload).await;
    let text = match result {
        Ok(Some(payload)) => frame("response", id, payload),
        // Streamed: frames were already delivered.
        Ok(None) => return true,
        Err(err) => error_frame(id, &err),
    };
    connection.out.send(text).await.is_ok()
}

async fn direct_chat_inner(
    connection: &Connection,
    id: Option<&str>,
    payload: Value,
) -> TaskResult<Option<Value>> {
    let messages: Vec<ChatMessage> = serde_json::from_value(
        payload.get("messages").cloned().unwrap_or(Value::Null),
    )
    .map_err(|err| TaskError::Validation(format!("Invalid `messages`: {err}")))?;
    if messages.is_empty() {
        return Err(TaskError::Validation("Chat requires at least one message".into()));
    }

    let sanitizer = InputSanitizer::new();
    for message in messages.iter().filter(|m| m.role == ChatRole::User) {
        let report = sanitizer.inspect(&message.content, SanitizeContext::LlmMessage);
        if !report.safe {
            connection.gateway.bus().publish(GatewayEvent::new(
                "alerts",
                "security.prompt_injection",
                json!({"source": "connection", "warnings": report.warnings}),
            ));
            return Err(TaskError::InjectionBlocked);
        }
    }

    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .or_else(|| connection.gateway.router().list_models().into_iter().next())
        .ok_or_else(|| TaskError::Upstream("no model available".into()))?;
    let request = LlmRequest {
        model,
        messages,
        max_tokens: payload
            .get("maxTokens")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok()),
        temperature: None,
    };

    let stream = payload.get("stream").and_then(Value::as_bool) == Some(true);
    if !stream {
        let response = connection
            .gateway
            .router()
            .route(&request)
            .await
            .map_err(|err| TaskError::Upstream(err.to_string()))?;
        return Ok(Some(json!({
            "content": response.content,
            "model": response.model,
            "usage": response.usage,
            "providerId": response.provider_id,
        })));
    }

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<LlmChunk>(OUTBOUND_BUFFER);
    let out = connection.out.clone();
    let stream_id = id.map(ToOwned::to_owned);
    let forwarder = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            let text = frame(
                "chat_stream",
                stream_id.as_deref(),
                json!({"delta": chunk.delta}),
            );
            if out.try_send(text).is_err() {
                break;
            }
        }
    });
    let routed = connection.gateway.router().route_stream(&request, chunk_tx).await;
    let _ = forwarder.await;

    let end = match routed {
        Ok(response) => frame(
            "chat_stream_end",
            id,
            json!({
                "content": response.content,
                "model": response.model,
                "usage": response.usage,
            }),
        ),
        Err(err) => frame("chat_stream_end", id, json!({"error": err.to_string()})),
    };
    let _ = connection.out.send(end).await;
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(channel: &str, event_type: &str) -> GatewayEvent {
        GatewayEvent::new(channel, event_type, Value::Null)
    }

    fn connection_with_subs(subs: &[&str]) -> HashSet<String> {
        subs.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn subscription_matching() {
        let subs = connection_with_subs(&["alerts", "a2a.*"]);
        let matches = |e: &GatewayEvent| {
            subs.iter().any(|sub| {
                sub == "*"
                    || sub == &e.channel
                    || sub
                        .strip_suffix(".*")
                        .is_some_and(|prefix| {
                            e.channel == prefix || e.event_type.starts_with(prefix)
                        })
            })
        };
        assert!(matches(&event("alerts", "rate_limit.exceeded")));
        assert!(matches(&event("a2a", "a2a.task.completed")));
        assert!(!matches(&event("events", "agent.spawned")));
    }

    #[test]
    fn frames_carry_ids() {
        let text = frame("response", Some("42"), json!({"ok": true}));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["id"], "42");
        assert_eq!(value["type"], "response");
    }

    #[test]
    fn error_frames_carry_codes() {
        let text = error_frame(Some("1"), &TaskError::ApprovalRequired);
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["payload"]["code"], "APPROVAL_REQUIRED");
        assert_eq!(value["payload"]["status"], "error");
    }
}

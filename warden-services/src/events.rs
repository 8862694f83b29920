//! Broadcast event bus shared by gateway components and subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// An event published on a named channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    /// Channel the event was published on (`alerts`, `events`, `a2a`, ...).
    pub channel: String,
    /// Application-defined event type, e.g. `rate_limit.exceeded`.
    pub event_type: String,
    /// Structured payload.
    #[serde(default)]
    pub payload: Value,
    /// Publication timestamp.
    pub published_at: DateTime<Utc>,
}

impl GatewayEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            channel: channel.into(),
            event_type: event_type.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

/// Publish/subscribe interface consumed by the core.
///
/// Fan-out is best-effort: subscribers that fall behind the channel
/// capacity observe a lag error and are expected to resubscribe or drop.
pub trait EventBus: Send + Sync {
    /// Publishes an event to all current subscribers.
    fn publish(&self, event: GatewayEvent);

    /// Opens a new subscription receiving events published after this call.
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;
}

const DEFAULT_BUS_CAPACITY: usize = 1024;

/// [`EventBus`] backed by a `tokio::sync::broadcast` channel.
#[derive(Debug)]
pub struct BroadcastBus {
    sender: broadcast::Sender<GatewayEvent>,
}

impl BroadcastBus {
    /// Creates a bus with the supplied per-subscriber buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: GatewayEvent) {
        debug!(channel = %event.channel, event_type = %event.event_type, "event published");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = BroadcastBus::default();
        let mut rx = bus.subscribe();
        bus.publish(GatewayEvent::new("alerts", "rate_limit.exceeded", json!({"agent": "a1"})));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.channel, "alerts");
        assert_eq!(event.event_type, "rate_limit.exceeded");
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_events() {
        let bus = BroadcastBus::default();
        bus.publish(GatewayEvent::new("events", "early", Value::Null));
        let mut rx = bus.subscribe();
        bus.publish(GatewayEvent::new("events", "late", Value::Null));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "late");
    }
}

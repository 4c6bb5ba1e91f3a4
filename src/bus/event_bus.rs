use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::event_types::Priority;

const BUS_CAPACITY: usize = 1024;

/// A raw backend event before it reaches the batcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub id: String,
    pub seq: i64,
    pub channel: String,
    pub workspace_id: Option<String>,
    pub session_id: Option<String>,
    /// Explicit override. `None` means the channel table decides.
    pub priority: Option<Priority>,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// Scope of a bus event: which workspace and session it belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventScope {
    pub workspace_id: Option<String>,
    pub session_id: Option<String>,
}

impl EventScope {
    pub fn new(workspace_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            workspace_id: Some(workspace_id.into()),
            session_id: Some(session_id.into()),
        }
    }

    pub fn unscoped() -> Self {
        Self::default()
    }
}

pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
    seq: AtomicI64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            seq: AtomicI64::new(0),
        }
    }

    /// Publish a pre-built event onto the bus.
    pub fn publish(&self, event: BusEvent) {
        if let Err(e) = self.tx.send(event) {
            tracing::warn!("event bus publish failed (no receivers?): {e}");
        }
    }

    /// Convenience: build and publish an event in one call.
    pub fn emit(
        &self,
        channel: impl Into<String>,
        payload: serde_json::Value,
        scope: EventScope,
    ) -> BusEvent {
        self.emit_with_priority(channel, payload, scope, None)
    }

    pub fn emit_with_priority(
        &self,
        channel: impl Into<String>,
        payload: serde_json::Value,
        scope: EventScope,
        priority: Option<Priority>,
    ) -> BusEvent {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = BusEvent {
            id: Uuid::new_v4().to_string(),
            seq,
            channel: channel.into(),
            workspace_id: scope.workspace_id,
            session_id: scope.session_id,
            priority,
            payload,
            created_at: Utc::now().to_rfc3339(),
        };
        self.publish(event.clone());
        event
    }

    /// Get a new receiver for this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_assigns_increasing_sequence() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let first = bus.emit("agent:event", json!({ "type": "progress" }), EventScope::unscoped());
        let second = bus.emit(
            "agent:event",
            json!({ "type": "progress" }),
            EventScope::new("ws-1", "s-1"),
        );

        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(first.id.len(), 36);
        assert_ne!(first.id, second.id);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.seq, 0);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.workspace_id.as_deref(), Some("ws-1"));
        assert_eq!(received.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn test_emit_without_receivers_does_not_panic() {
        let bus = EventBus::new();
        let event = bus.emit("metrics:update", json!({}), EventScope::unscoped());
        assert_eq!(event.channel, "metrics:update");
    }
}

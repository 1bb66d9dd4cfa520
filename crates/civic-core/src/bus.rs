//! Room-scoped broadcast bus.
//!
//! Workflows publish messages tagged with a room name; the server side
//! subscribes and fans each envelope out to the room's live connections.
//! Publishing is best-effort: normalization failures and missing
//! subscribers are logged, never returned.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::envelope::{normalize, Envelope};

/// Room every connection joins on connect.
pub const DEFAULT_ROOM: &str = "default_room";

/// Per-user room name, joined when the handshake carries a user id.
pub fn user_room(user_id: &str) -> String {
    format!("user_{user_id}")
}

/// An envelope addressed to one room.
#[derive(Clone, Debug)]
pub struct RoomEvent {
    pub room: String,
    pub envelope: Envelope,
}

#[derive(Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<RoomEvent>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.tx.subscribe()
    }

    /// Normalize and publish an arbitrary message to `room`.
    pub fn publish(&self, room: &str, message: Value) {
        let Some(envelope) = normalize(message) else {
            return;
        };
        self.publish_envelope(room, envelope);
    }

    /// Publish an already-canonical envelope to `room`.
    pub fn publish_envelope(&self, room: &str, envelope: Envelope) {
        let event = RoomEvent {
            room: room.to_string(),
            envelope,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(room, "broadcast published with no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

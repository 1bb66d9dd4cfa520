//! Bridges the broadcast bus onto live connections: one task subscribes to
//! the bus and fans each envelope out to its room. A single bridge task
//! preserves per-publisher ordering.

use std::sync::Arc;

use tokio::sync::broadcast;

use civic_core::{BroadcastBus, RoomEvent};

use crate::session::SessionRegistry;

pub struct RoomBridge {
    registry: Arc<SessionRegistry>,
}

impl RoomBridge {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn start(&self, mut rx: broadcast::Receiver<RoomEvent>) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event.envelope) {
                        Ok(json) => {
                            registry.deliver(&event.room, &json);
                        }
                        Err(error) => {
                            tracing::warn!(%error, room = %event.room, "failed to serialize envelope");
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "room bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("broadcast bus closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Subscribe a bridge to `bus` and start it.
pub fn start_bridge(
    registry: Arc<SessionRegistry>,
    bus: &BroadcastBus,
) -> tokio::task::JoinHandle<()> {
    RoomBridge::new(registry).start(bus.subscribe())
}

//! Connection/session registry.
//!
//! One `Session` per live realtime connection. The registry owns every
//! session exclusively: creation joins the broadcast rooms, inbound frames
//! refresh activity, and a periodic sweep evicts whatever has gone idle.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use civic_core::ids::{ConnectionId, SessionId};
use civic_core::{user_room, BroadcastBus, DEFAULT_ROOM};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("system clock is before the unix epoch")]
    Clock,
}

fn now_secs() -> Result<u64, SessionError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| SessionError::Clock)
}

/// A tracked realtime connection.
pub struct Session {
    pub session_id: SessionId,
    pub connection_id: ConnectionId,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    last_activity: AtomicU64,
    rooms: RwLock<HashSet<String>>,
    tx: mpsc::Sender<String>,
}

impl Session {
    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn in_room(&self, room: &str) -> bool {
        self.rooms.read().contains(room)
    }

    pub fn rooms(&self) -> Vec<String> {
        self.rooms.read().iter().cloned().collect()
    }
}

/// On-demand aggregate counters, embedded in acks and stats broadcasts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub active_connections: usize,
    pub unique_users: usize,
}

pub struct SessionRegistry {
    sessions: DashMap<ConnectionId, Arc<Session>>,
    send_queue: usize,
}

impl SessionRegistry {
    pub fn new(send_queue: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            send_queue,
        }
    }

    /// Register a connection. The session joins the default room and, when
    /// a user id is present, that user's room. Returns the session plus the
    /// receiver its writer task drains.
    pub fn create_session(
        &self,
        connection_id: ConnectionId,
        user_id: Option<String>,
    ) -> Result<(Arc<Session>, mpsc::Receiver<String>), SessionError> {
        let now = now_secs()?;
        let (tx, rx) = mpsc::channel(self.send_queue);

        let mut rooms = HashSet::from([DEFAULT_ROOM.to_string()]);
        if let Some(uid) = &user_id {
            rooms.insert(user_room(uid));
        }

        let session = Arc::new(Session {
            session_id: SessionId::new(),
            connection_id: connection_id.clone(),
            user_id,
            connected_at: Utc::now(),
            last_activity: AtomicU64::new(now),
            rooms: RwLock::new(rooms),
            tx,
        });
        self.sessions.insert(connection_id, Arc::clone(&session));
        Ok((session, rx))
    }

    /// Refresh the activity clock for a connection. Unknown connections are
    /// a no-op.
    pub fn update_activity(&self, connection_id: &ConnectionId) -> bool {
        let Ok(now) = now_secs() else {
            return false;
        };
        match self.sessions.get(connection_id) {
            Some(session) => {
                session.last_activity.store(now, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Remove a session immediately. Idempotent: removing twice is a no-op
    /// and the active count never goes negative.
    pub fn remove_session(&self, connection_id: &ConnectionId) -> bool {
        self.sessions.remove(connection_id).is_some()
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Session>> {
        self.sessions.get(connection_id).map(|s| Arc::clone(&s))
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Evict every session idle longer than `threshold` and return the
    /// evicted connection ids.
    pub fn cleanup_inactive(
        &self,
        threshold: Duration,
    ) -> Result<Vec<ConnectionId>, SessionError> {
        let now = now_secs()?;
        let idle: Vec<ConnectionId> = self
            .sessions
            .iter()
            .filter(|entry| now.saturating_sub(entry.last_activity()) > threshold.as_secs())
            .map(|entry| entry.key().clone())
            .collect();

        for connection_id in &idle {
            self.sessions.remove(connection_id);
            tracing::info!(connection = %connection_id, "evicted idle session");
        }
        Ok(idle)
    }

    /// O(n) scan; callers treat the numbers as eventually consistent.
    pub fn stats(&self) -> ServerStats {
        let mut users = HashSet::new();
        for entry in self.sessions.iter() {
            if let Some(uid) = &entry.user_id {
                users.insert(uid.clone());
            }
        }
        ServerStats {
            active_connections: self.sessions.len(),
            unique_users: users.len(),
        }
    }

    /// Queue a frame for one connection. Full queues drop the frame.
    pub fn send_to(&self, connection_id: &ConnectionId, text: String) -> bool {
        let Some(session) = self.sessions.get(connection_id) else {
            return false;
        };
        match session.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection = %connection_id, "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Fan a frame out to every member of `room`, at most once per
    /// connection. No retries, no queuing for the disconnected. Returns the
    /// number of deliveries that were accepted.
    pub fn deliver(&self, room: &str, text: &str) -> usize {
        let mut delivered = 0;
        for entry in self.sessions.iter() {
            if !entry.in_room(room) {
                continue;
            }
            match entry.tx.try_send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        connection = %entry.connection_id,
                        room,
                        "send queue full, dropping broadcast"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }
}

/// Timing knobs for the idle sweep.
#[derive(Clone, Copy, Debug)]
pub struct SweepConfig {
    pub interval: Duration,
    pub threshold: Duration,
    /// Shorter wait applied after a failed pass.
    pub backoff: Duration,
}

/// Periodically evict idle sessions, broadcasting fresh stats after any
/// eviction. A failed pass logs and retries after `backoff` instead of the
/// normal interval.
pub fn start_sweep_task(
    registry: Arc<SessionRegistry>,
    bus: BroadcastBus,
    config: SweepConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match registry.cleanup_inactive(config.threshold) {
                Ok(evicted) => {
                    if !evicted.is_empty() {
                        tracing::info!(count = evicted.len(), "idle sweep evicted sessions");
                        bus.publish(
                            DEFAULT_ROOM,
                            json!({
                                "type": "server_stats",
                                "title": "Server Stats",
                                "payload": registry.stats(),
                            }),
                        );
                    }
                    tokio::time::sleep(config.interval).await;
                }
                Err(error) => {
                    tracing::error!(%error, "idle sweep failed");
                    tokio::time::sleep(config.backoff).await;
                }
            }
        }
    })
}

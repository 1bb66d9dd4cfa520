//! Realtime transport: WebSocket upgrade, per-connection reader/writer
//! tasks, and the health endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::CorsLayer;

use civic_core::ids::ConnectionId;
use civic_core::{Envelope, DEFAULT_ROOM};
use civic_workflows::{WorkflowContext, WorkflowRegistry};

use crate::bridge::start_bridge;
use crate::dispatch::Dispatcher;
use crate::session::{start_sweep_task, SessionRegistry, SweepConfig};

/// Server configuration. Timing constants follow the deployment defaults:
/// a five-minute sweep, a ten-minute idle threshold, a one-minute backoff.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    pub idle_threshold: Duration,
    pub sweep_interval: Duration,
    pub sweep_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8008,
            max_send_queue: 256,
            idle_threshold: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(300),
            sweep_backoff: Duration::from_secs(60),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub ctx: WorkflowContext,
    pub dispatcher: Arc<Dispatcher>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server plus its background tasks.
pub async fn start(
    config: ServerConfig,
    ctx: WorkflowContext,
    workflows: Arc<WorkflowRegistry>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(SessionRegistry::new(config.max_send_queue));

    let bridge = start_bridge(Arc::clone(&registry), &ctx.bus);
    let sweep = start_sweep_task(
        Arc::clone(&registry),
        ctx.bus.clone(),
        SweepConfig {
            interval: config.sweep_interval,
            threshold: config.idle_threshold,
            backoff: config.sweep_backoff,
        },
    );

    let dispatcher = Arc::new(Dispatcher::new(ctx.clone(), workflows));
    let state = AppState {
        registry: Arc::clone(&registry),
        ctx,
        dispatcher,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "civic server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        _server: server,
        _bridge: bridge,
        _sweep: sweep,
    })
}

/// Keeps the background tasks alive for the server's lifetime.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Arc<SessionRegistry>,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _sweep: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade. The user id may arrive as a `user_id` query
/// parameter or an `x-user-id` header; without one the session is
/// anonymous.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let user_id = params.get("user_id").cloned().or_else(|| {
        headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Option<String>) {
    let connection_id = ConnectionId::new();
    let (session, mut rx) = match state.registry.create_session(connection_id.clone(), user_id) {
        Ok(pair) => pair,
        Err(error) => {
            tracing::error!(%error, "failed to create session");
            return;
        }
    };
    tracing::info!(connection = %connection_id, session = %session.session_id, "client connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Connect acknowledgement, straight to this socket.
    let ack = Envelope::new(
        "connection_successful",
        "Connected",
        json!({
            "session_id": session.session_id,
            "user_id": session.user_id,
            "connected_at": session.connected_at.to_rfc3339(),
            "server_stats": state.registry.stats(),
        }),
    );
    match serde_json::to_string(&ack) {
        Ok(frame) => {
            let _ = ws_tx.send(WsMessage::Text(frame.into())).await;
        }
        Err(error) => tracing::warn!(%error, "failed to serialize connect ack"),
    }

    // Writer: drain the session queue onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: every inbound frame refreshes activity and goes to dispatch.
    let reader_state = state.clone();
    let reader_conn = connection_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                WsMessage::Text(text) => {
                    reader_state.registry.update_activity(&reader_conn);
                    reader_state.dispatcher.handle(&reader_conn, text.as_str());
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    state.registry.remove_session(&connection_id);
    state.ctx.bus.publish(
        DEFAULT_ROOM,
        json!({
            "type": "server_stats",
            "title": "Server Stats",
            "payload": state.registry.stats(),
        }),
    );
    tracing::info!(connection = %connection_id, "client disconnected");
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "stats": state.registry.stats(),
        "history_entries": state.ctx.history.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use civic_core::{BroadcastBus, HistoryLog};
    use civic_engine::mock::MockExecutor;
    use civic_engine::Scheduler;
    use civic_workflows::AgentRoster;

    fn test_ctx() -> WorkflowContext {
        WorkflowContext::new(
            Scheduler::new(),
            BroadcastBus::new(256),
            Arc::new(HistoryLog::default()),
            AgentRoster::uniform(Arc::new(MockExecutor::echoing())),
        )
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let ctx = test_ctx();
        let workflows = Arc::new(WorkflowRegistry::new());
        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };

        let handle = start(config, ctx, workflows).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["stats"]["active_connections"], 0);
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let ctx = test_ctx();
        let registry = Arc::new(SessionRegistry::new(32));
        let dispatcher = Arc::new(Dispatcher::new(
            ctx.clone(),
            Arc::new(WorkflowRegistry::new()),
        ));

        let _router = build_router(AppState {
            registry,
            ctx,
            dispatcher,
        });
    }
}

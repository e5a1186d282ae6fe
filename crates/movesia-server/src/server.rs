//! HTTP + WebSocket server.
//!
//! Routes:
//! - `GET /ws/unity` — WebSocket upgrade for the editor plugin
//! - `GET /health` — liveness probe
//! - `GET /unity/status` — editor connection status
//! - `POST /unity/command/{command_type}` — round-trip command to the editor
//! - `GET /metrics` — Prometheus exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Json, Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use movesia_core::CommandError;
use movesia_settings::MovesiaSettings;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::health::{self, HealthResponse};
use crate::websocket::EditorBridge;

#[derive(Clone)]
struct AppState {
    bridge: Arc<EditorBridge>,
    metrics: PrometheusHandle,
    settings: MovesiaSettings,
    start_time: Instant,
}

/// Query parameters on the WebSocket upgrade.
///
/// `session` identifies the editor across reconnects; `conn` is the
/// monotonically increasing sequence used to order connection attempts
/// within a session. An absent `conn` sorts lowest.
#[derive(Debug, Deserialize)]
struct WsParams {
    session: Option<String>,
    #[serde(default)]
    conn: u64,
}

#[derive(Debug, Default, Deserialize)]
struct CommandQuery {
    timeout_ms: Option<u64>,
}

/// Running server: the bound address and the serve task.
pub struct ServerHandle {
    /// Address actually bound (resolves port 0 to the chosen port).
    pub addr: SocketAddr,
    /// Task driving `axum::serve`; joins when the server exits.
    pub task: JoinHandle<()>,
}

/// HTTP + WebSocket front for the editor bridge.
pub struct MovesiaServer {
    settings: MovesiaSettings,
    bridge: Arc<EditorBridge>,
    metrics: PrometheusHandle,
}

impl MovesiaServer {
    /// Assemble a server around an existing bridge and metrics recorder.
    pub fn new(settings: MovesiaSettings, bridge: Arc<EditorBridge>, metrics: PrometheusHandle) -> Self {
        Self {
            settings,
            bridge,
            metrics,
        }
    }

    /// Build the axum router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = AppState {
            bridge: self.bridge.clone(),
            metrics: self.metrics.clone(),
            settings: self.settings.clone(),
            start_time: Instant::now(),
        };
        Router::new()
            .route("/ws/unity", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/unity/status", get(status_handler))
            .route("/unity/command/{command_type}", post(command_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address and serve until `shutdown` fires.
    ///
    /// Port 0 binds an ephemeral port; the chosen address is reported on
    /// the returned handle.
    pub async fn listen(&self, shutdown: CancellationToken) -> std::io::Result<ServerHandle> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "server listening");

        let app = self.router();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(err) = served {
                error!(error = %err, "server error");
            }
        });
        Ok(ServerHandle {
            addr: local_addr,
            task,
        })
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let bridge = state.bridge.clone();
    ws.max_message_size(state.settings.server.max_message_size)
        .on_upgrade(move |socket| async move {
            bridge
                .handle_connection(socket, params.session, params.conn)
                .await;
        })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.bridge.connection_count(),
        state.bridge.is_compiling(),
    ))
}

async fn status_handler(State(state): State<AppState>) -> Json<Value> {
    let bridge = &state.bridge;
    let status = if bridge.is_connected() {
        "connected"
    } else {
        "disconnected"
    };
    Json(json!({
        "status": status,
        "project": bridge.current_project(),
        "compiling": bridge.is_compiling(),
        "connections": bridge.connection_count(),
    }))
}

async fn command_handler(
    State(state): State<AppState>,
    Path(command_type): Path<String>,
    Query(query): Query<CommandQuery>,
    Json(body): Json<Value>,
) -> Response {
    let timeout = query.timeout_ms.map(Duration::from_millis);
    match state.bridge.send_and_wait(&command_type, body, timeout).await {
        Ok(reply) => Json(reply).into_response(),
        Err(err) => {
            let status = match &err {
                CommandError::NoConnection => StatusCode::SERVICE_UNAVAILABLE,
                CommandError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            };
            (status, Json(json!({"error": err.to_string()}))).into_response()
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}

// ───── Tests ─────

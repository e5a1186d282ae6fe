//! Prometheus metrics for the editor bridge.
//!
//! Metric names are centralized here so dashboards and alerts have one
//! place to look, even though call sites use the string literals directly
//! with the `metrics` macros.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Total WebSocket connections accepted.
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";

/// Total WebSocket disconnections.
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";

/// Currently open WebSocket connections.
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";

/// Connections replaced by a newer arrival for the same session.
pub const WS_SUPERSEDED_TOTAL: &str = "ws_superseded_total";

/// Connections refused for arriving with a stale sequence.
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";

/// Inbound frames dropped because they did not parse.
pub const WS_INVALID_FRAMES_TOTAL: &str = "ws_invalid_frames_total";

/// Lifetime of a connection from accept to cleanup.
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";

/// Liveness probes sent to idle connections.
pub const HEARTBEAT_PINGS_TOTAL: &str = "heartbeat_pings_total";

/// Connections closed gracefully for exceeding the idle ceiling.
pub const HEARTBEAT_IDLE_CLOSES_TOTAL: &str = "heartbeat_idle_closes_total";

/// Connections force-terminated by the liveness sweep.
pub const HEARTBEAT_TERMINATIONS_TOTAL: &str = "heartbeat_terminations_total";

/// Round-trip commands sent to the editor.
pub const COMMANDS_SENT_TOTAL: &str = "commands_sent_total";

/// Commands that hit their reply deadline.
pub const COMMAND_TIMEOUTS_TOTAL: &str = "command_timeouts_total";

/// Command round-trip latency.
pub const COMMAND_ROUNDTRIP_SECONDS: &str = "command_roundtrip_seconds";

/// Install the global Prometheus recorder.
///
/// Must be called once at startup, before any metrics are recorded.
/// Panics if a recorder is already installed, which indicates a double
/// initialization bug.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder");
    info!("metrics recorder installed");
    handle
}

/// Render current metrics in the Prometheus exposition format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// ───── Tests ─────

//! Protocol constants shared with the editor plugin.
//!
//! Close codes, the set of message types that must be acknowledged, and the
//! control types the transport layer consumes without forwarding. The
//! editor plugin matches on these exact values.

use serde::{Deserialize, Serialize};

/// WebSocket close codes — the standard range plus Movesia's 4xxx block.
#[allow(missing_docs)]
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const UNSUPPORTED: u16 = 1003;
    pub const NO_STATUS: u16 = 1005;
    pub const ABNORMAL: u16 = 1006;
    pub const INVALID_DATA: u16 = 1007;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
    pub const EXTENSION_REQUIRED: u16 = 1010;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const SERVICE_RESTART: u16 = 1012;
    pub const TRY_AGAIN_LATER: u16 = 1013;

    /// Connection superseded by a newer one for the same session.
    pub const SUPERSEDED: u16 = 4001;
    /// Session (or project) already owned by another live connection.
    pub const DUPLICATE_SESSION: u16 = 4002;
    pub const AUTHENTICATION_FAILED: u16 = 4003;
    pub const SESSION_EXPIRED: u16 = 4004;
    /// Connection reset around a compilation cycle.
    pub const COMPILATION_RESET: u16 = 4005;
}

/// Lifecycle state of an editor connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Socket upgraded, admission not yet decided.
    #[default]
    Connecting,
    /// Admitted and serving traffic.
    Open,
    /// Close requested, socket not yet torn down.
    Closing,
    /// Fully torn down.
    Closed,
}

/// Message types the editor expects an explicit `ack` reply for.
pub const ACK_REQUIRED_TYPES: &[&str] = &[
    "hello",
    "assets_imported",
    "assets_deleted",
    "assets_moved",
    "scene_saved",
    "project_changed",
    "compile_started",
    "compile_finished",
    "will_save_assets",
    "hierarchy_changed",
    "selection_changed",
];

/// Control types consumed by the transport layer, never forwarded to
/// domain handlers.
pub const INTERNAL_TYPES: &[&str] = &["hb", "ack", "pong"];

/// Whether `message_type` must be acknowledged.
pub fn requires_ack(message_type: &str) -> bool {
    ACK_REQUIRED_TYPES.contains(&message_type)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

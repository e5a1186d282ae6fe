//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the editor
//! plugin's JSON wire format. Each type implements [`Default`] with
//! production default values. Types marked with `#[serde(default)]` allow
//! partial JSON — missing fields get their default value during
//! deserialization.

use serde::{Deserialize, Serialize};

/// Root settings type for the Movesia agent.
///
/// Loaded from `~/.movesia/settings.json` with defaults applied for
/// missing fields. Environment variables can override specific values.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MovesiaSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Server network settings.
    pub server: ServerSettings,
    /// Heartbeat / liveness settings.
    pub heartbeat: HeartbeatSettings,
    /// Round-trip command settings.
    pub commands: CommandSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for MovesiaSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "movesia".to_string(),
            server: ServerSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            commands: CommandSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Server network settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Maximum inbound WebSocket frame size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8765,
            max_message_size: 10 * 1024 * 1024,
        }
    }
}

/// Heartbeat / liveness settings.
///
/// The sweep runs every `sweep_interval_ms`; a connection is only probed
/// once it has been idle longer than `ping_after_idle_ms`, and is dropped
/// outright past `max_idle_ms`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// How often the sweep task checks connections.
    pub sweep_interval_ms: u64,
    /// Idle time after which a probe is sent.
    pub ping_after_idle_ms: u64,
    /// Idle time after which the connection is closed.
    pub max_idle_ms: u64,
    /// Consecutive missed probes before the connection is terminated.
    pub max_missed_pongs: u32,
    /// Force-kill a connection stuck in CLOSING for this long.
    pub closing_force_kill_ms: u64,
    /// Suspend sweeps for this long when a compile starts.
    pub compile_suspend_ms: u64,
    /// Grace period after a compile finishes.
    pub post_compile_grace_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 40_000,
            ping_after_idle_ms: 90_000,
            max_idle_ms: 600_000,
            max_missed_pongs: 3,
            closing_force_kill_ms: 10_000,
            compile_suspend_ms: 120_000,
            post_compile_grace_ms: 30_000,
        }
    }
}

/// Round-trip command settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandSettings {
    /// Default reply deadline for a command.
    pub timeout_ms: u64,
    /// Maximum number of commands awaiting replies at once.
    pub max_pending: usize,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_pending: 100,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum log level when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

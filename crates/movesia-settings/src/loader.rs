//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MovesiaSettings::default()`]
//! 2. If `~/.movesia/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::MovesiaSettings;

/// Resolve the path to the settings file (`~/.movesia/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".movesia").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MovesiaSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<MovesiaSettings> {
    let defaults = serde_json::to_value(MovesiaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MovesiaSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Each env var has strict parsing rules: integers must be valid and within
/// the specified range, and invalid values are silently ignored (falling
/// back to the file value or default).
pub fn apply_env_overrides(settings: &mut MovesiaSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("MOVESIA_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("MOVESIA_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("MOVESIA_MAX_MESSAGE_SIZE", 1024, 1_073_741_824) {
        settings.server.max_message_size = v;
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = read_env_u64("MOVESIA_SWEEP_INTERVAL_MS", 1000, 600_000) {
        settings.heartbeat.sweep_interval_ms = v;
    }
    if let Some(v) = read_env_u64("MOVESIA_PING_AFTER_IDLE_MS", 1000, 3_600_000) {
        settings.heartbeat.ping_after_idle_ms = v;
    }
    if let Some(v) = read_env_u64("MOVESIA_MAX_IDLE_MS", 1000, 86_400_000) {
        settings.heartbeat.max_idle_ms = v;
    }
    if let Some(v) = read_env_u32("MOVESIA_MAX_MISSED_PONGS", 1, 100) {
        settings.heartbeat.max_missed_pongs = v;
    }
    if let Some(v) = read_env_u64("MOVESIA_CLOSING_FORCE_KILL_MS", 1000, 600_000) {
        settings.heartbeat.closing_force_kill_ms = v;
    }
    if let Some(v) = read_env_u64("MOVESIA_COMPILE_SUSPEND_MS", 1000, 3_600_000) {
        settings.heartbeat.compile_suspend_ms = v;
    }
    if let Some(v) = read_env_u64("MOVESIA_POST_COMPILE_GRACE_MS", 1000, 3_600_000) {
        settings.heartbeat.post_compile_grace_ms = v;
    }

    // ── Commands ────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("MOVESIA_COMMAND_TIMEOUT_MS", 100, 3_600_000) {
        settings.commands.timeout_ms = v;
    }
    if let Some(v) = read_env_usize("MOVESIA_MAX_PENDING_COMMANDS", 1, 10_000) {
        settings.commands.max_pending = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("MOVESIA_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

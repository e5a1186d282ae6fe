//! Command and cancellation error types.
//!
//! Every failure mode of a round-trip editor command is a value here, not a
//! panic or a stringly-typed exception. Callers match on the variant; HTTP
//! surfaces map variants to status codes.

use std::time::Duration;

use thiserror::Error;

/// Why a pending command was cancelled before the editor replied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// The connection carrying the command went away.
    ConnectionClosed,
    /// The editor entered a compile cycle; in-flight commands cannot complete.
    CompilationStarted,
    /// The server is shutting down.
    Shutdown,
}

impl CancelReason {
    /// Human-readable reason, also used in logs and close frames.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionClosed => "connection closed",
            Self::CompilationStarted => "compilation started",
            Self::Shutdown => "server shutdown",
        }
    }
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure modes for a round-trip command to the editor.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No open editor connection to carry the command.
    #[error("no editor connection available")]
    NoConnection,
    /// The editor did not reply within the deadline.
    #[error("command '{command}' timed out after {elapsed:?}")]
    Timeout {
        /// Command type that timed out.
        command: String,
        /// How long the caller waited.
        elapsed: Duration,
    },
    /// The command was cancelled before a reply arrived.
    #[error("command cancelled: {0}")]
    Cancelled(CancelReason),
    /// The pending-command table is at capacity.
    #[error("too many pending commands ({0})")]
    TooManyPending(usize),
    /// The outbound channel rejected the command frame.
    #[error("failed to enqueue command frame")]
    SendFailed,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

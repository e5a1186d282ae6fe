//! # movesia-core
//!
//! Wire envelope, protocol constants, IDs, and error types for the Movesia
//! agent.
//!
//! This crate provides the shared vocabulary for the editor bridge:
//!
//! - **Envelope**: the `{source, type, ts, id, body, session}` wire unit;
//!   the `id` is the correlation key and replies echo it
//! - **Protocol**: close codes, ack-required message types, control types
//! - **IDs**: UUID v7 message/session ids, short random connection ids
//! - **Errors**: `EnvelopeError`, `CommandError`, `CancelReason`
//! - **Logging**: `init_subscriber` tracing bootstrap

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use envelope::{Envelope, EnvelopeError, MessageSource};
pub use errors::{CancelReason, CommandError};
pub use protocol::{ACK_REQUIRED_TYPES, ConnectionState, INTERNAL_TYPES, close_code, requires_ack};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let env = Envelope::new("hb", serde_json::json!({}), None);
        assert_eq!(env.source, MessageSource::Vscode);
        assert!(requires_ack("hello"));
        assert_eq!(close_code::SUPERSEDED, 4001);
        assert_eq!(ConnectionState::default(), ConnectionState::Connecting);
    }
}

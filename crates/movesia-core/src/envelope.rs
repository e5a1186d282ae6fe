//! Message envelope shared by every frame on the editor WebSocket.
//!
//! Every frame is a JSON object with the same six fields. The envelope
//! `id` doubles as the correlation key: replies echo the id of the message
//! they answer.
//!
//! These types match the editor plugin's wire format exactly — the Unity
//! and desktop clients depend on the string values.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::ids;

/// Peer that produced a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    /// The Unity editor plugin.
    Unity,
    /// The agent server (historical wire name, kept for compatibility).
    Vscode,
    /// The desktop shell.
    Electron,
}

impl MessageSource {
    /// Wire string for this source.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unity => "unity",
            Self::Vscode => "vscode",
            Self::Electron => "electron",
        }
    }

    /// Parse a wire string. Unknown values fall back to `unity`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "vscode" => Self::Vscode,
            "electron" => Self::Electron,
            _ => Self::Unity,
        }
    }
}

/// Why an inbound frame failed validation.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame was not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The frame parsed but was not a JSON object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// A required field was absent.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// A required field had the wrong JSON type.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),
}

/// Standard message envelope for all editor WebSocket traffic.
#[derive(Clone, Debug, Serialize)]
pub struct Envelope {
    /// Origin of the message.
    pub source: MessageSource,
    /// Message type, e.g. `"hello"` or `"execute_menu_item"`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Unix timestamp in seconds.
    pub ts: i64,
    /// Unique message id; replies echo it.
    pub id: String,
    /// Type-specific payload.
    pub body: Value,
    /// Session the message belongs to, when bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
}

impl Envelope {
    /// Create a server-originated envelope with a fresh id and timestamp.
    pub fn new(message_type: impl Into<String>, body: Value, session: Option<String>) -> Self {
        Self {
            source: MessageSource::Vscode,
            message_type: message_type.into(),
            ts: chrono::Utc::now().timestamp(),
            id: ids::message_id(),
            body,
            session,
        }
    }

    /// Create a reply envelope that echoes an existing message id.
    pub fn reply(message_type: impl Into<String>, body: Value, id: impl Into<String>) -> Self {
        Self {
            source: MessageSource::Vscode,
            message_type: message_type.into(),
            ts: chrono::Utc::now().timestamp(),
            id: id.into(),
            body,
            session: None,
        }
    }

    /// Parse and validate an inbound frame.
    ///
    /// `source`, `type`, `ts`, and `id` must be present and `type` must be
    /// a string. An unknown `source` string falls back to `unity`; a missing
    /// or null `body` becomes an empty object.
    pub fn parse(text: &str) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(map) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        for field in ["source", "type", "ts", "id"] {
            if !map.contains_key(field) {
                return Err(EnvelopeError::MissingField(field));
            }
        }

        let source = map
            .get("source")
            .and_then(Value::as_str)
            .map_or(MessageSource::Unity, MessageSource::from_wire);
        let message_type = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::InvalidField("type"))?
            .to_string();
        let ts = map
            .get("ts")
            .and_then(Value::as_i64)
            .ok_or(EnvelopeError::InvalidField("ts"))?;
        let id = map
            .get("id")
            .and_then(Value::as_str)
            .ok_or(EnvelopeError::InvalidField("id"))?
            .to_string();
        let body = match map.get("body") {
            None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
            Some(b) => b.clone(),
        };
        let session = map.get("session").and_then(Value::as_str).map(String::from);

        Ok(Self {
            source,
            message_type,
            ts,
            id,
            body,
            session,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

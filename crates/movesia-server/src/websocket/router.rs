//! Inbound frame routing.
//!
//! Every frame from the editor lands here. Control types (`hb`, `ack`,
//! `pong`) are consumed by the transport layer; compilation markers flip
//! connection state and suspend liveness checks but are still forwarded;
//! everything else is acked when the protocol requires it and fanned out
//! to event subscribers.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use metrics::counter;
use movesia_core::{CancelReason, Envelope, close_code, requires_ack};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::connection::EditorConnection;
use super::correlator::CommandCorrelator;
use super::heartbeat::HeartbeatEngine;
use super::registry::SessionRegistry;

/// `hello` payload fields the server cares about. Anything else in the
/// body is ignored.
#[derive(Debug, Default, Deserialize)]
struct HelloBody {
    project_path: Option<String>,
    editor_version: Option<String>,
}

/// Classifies and dispatches inbound editor frames.
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    heartbeat: Arc<HeartbeatEngine>,
    correlator: Arc<CommandCorrelator>,
    events: broadcast::Sender<Envelope>,
}

impl MessageRouter {
    /// Wire a router to the registry, heartbeat, correlator, and event fan-out.
    pub fn new(
        registry: Arc<SessionRegistry>,
        heartbeat: Arc<HeartbeatEngine>,
        correlator: Arc<CommandCorrelator>,
        events: broadcast::Sender<Envelope>,
    ) -> Self {
        Self {
            registry,
            heartbeat,
            correlator,
            events,
        }
    }

    /// Route one inbound frame.
    ///
    /// Returns the parsed envelope when the frame is a domain message the
    /// caller may want to correlate against pending commands; control
    /// frames and unparseable input return `None`.
    pub fn handle_message(&self, conn: &Arc<EditorConnection>, text: &str) -> Option<Envelope> {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(cid = %conn.cid, error = %err, "dropping invalid frame");
                counter!("ws_invalid_frames_total").increment(1);
                return None;
            }
        };

        // Only a frame that parses counts as activity.
        conn.update_seen();

        if let Some(session) = &envelope.session {
            conn.bind_session(session.clone());
        }

        match envelope.message_type.as_str() {
            "hb" => {
                // Application-level keepalive from the editor; answer in kind.
                let _ = conn.send_envelope(&Envelope::reply("pong", json!({}), envelope.id.clone()));
                return None;
            }
            "ack" => return None,
            "pong" => {
                self.heartbeat.handle_pong(conn);
                return None;
            }
            "compile_started" => {
                info!(cid = %conn.cid, "editor compilation started");
                conn.is_compiling.store(true, Ordering::Relaxed);
                self.heartbeat.suspend(Duration::from_millis(
                    self.heartbeat.config().compile_suspend_ms,
                ));
                let _ = self.correlator.fail_all(CancelReason::CompilationStarted);
            }
            "compile_finished" => {
                info!(cid = %conn.cid, "editor compilation finished");
                conn.is_compiling.store(false, Ordering::Relaxed);
                self.heartbeat.suspend(Duration::from_millis(
                    self.heartbeat.config().post_compile_grace_ms,
                ));
            }
            "hello" => {
                if !self.handle_hello(conn, &envelope) {
                    return None;
                }
            }
            _ => {}
        }

        if requires_ack(&envelope.message_type) {
            let _ = conn.send_envelope(&Envelope::reply("ack", json!({}), envelope.id.clone()));
        }

        // Fan out to subscribers; nobody listening is fine.
        let _ = self.events.send(envelope.clone());
        Some(envelope)
    }

    /// Apply a `hello`: record editor version and bind the announced
    /// project to this session.
    ///
    /// Returns `false` when the project is already owned by another live
    /// session, in which case the connection has been told to close and
    /// the frame must not be acked or forwarded.
    fn handle_hello(&self, conn: &Arc<EditorConnection>, envelope: &Envelope) -> bool {
        let body: HelloBody = serde_json::from_value(envelope.body.clone()).unwrap_or_else(|err| {
            warn!(cid = %conn.cid, error = %err, "unreadable hello body");
            HelloBody::default()
        });

        if let Some(version) = body.editor_version {
            conn.set_editor_version(version);
        }
        let Some(project) = body.project_path else {
            return true;
        };
        let Some(session_id) = conn.session_id() else {
            return true;
        };

        match self.registry.bind_project(&project, &session_id) {
            Ok(()) => {
                info!(cid = %conn.cid, project = %project, "project bound to session");
                conn.bind_project(project);
                true
            }
            Err(owner) => {
                warn!(
                    cid = %conn.cid,
                    project = %project,
                    owner = %owner,
                    "project already bound to a live session"
                );
                let reason = format!("project already bound to session {owner}");
                if !conn.request_close(close_code::DUPLICATE_SESSION, &reason) {
                    conn.terminate();
                }
                false
            }
        }
    }
}

// ───── Tests ─────

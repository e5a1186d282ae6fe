//! Editor bridge: connection lifecycle, session takeover, and round-trip
//! commands.
//!
//! One bridge instance owns the registry, the heartbeat engine, and the
//! pending-command table. HTTP handlers and the agent talk to the editor
//! exclusively through it.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use metrics::{counter, gauge, histogram};
use movesia_core::{CancelReason, CommandError, ConnectionState, Envelope, close_code, ids};
use movesia_settings::MovesiaSettings;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use super::connection::EditorConnection;
use super::correlator::CommandCorrelator;
use super::heartbeat::HeartbeatEngine;
use super::registry::{Admission, SessionRegistry};
use super::router::MessageRouter;
use super::session;

/// Per-connection outbound frame queue depth.
const OUTBOUND_QUEUE: usize = 1024;

/// Broadcast channel depth for editor events.
const EVENT_QUEUE: usize = 256;

type ConnectionCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Owns all editor-facing connection state for the server.
pub struct EditorBridge {
    settings: MovesiaSettings,
    registry: Arc<SessionRegistry>,
    heartbeat: Arc<HeartbeatEngine>,
    correlator: Arc<CommandCorrelator>,
    router: MessageRouter,
    events: broadcast::Sender<Envelope>,
    /// The connection commands are sent on; always the latest admitted one.
    primary: Mutex<Option<Arc<EditorConnection>>>,
    callbacks: Mutex<Vec<ConnectionCallback>>,
    started_at: Instant,
}

impl EditorBridge {
    /// Build a bridge and all the machinery it owns from settings.
    pub fn new(settings: MovesiaSettings) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let heartbeat = Arc::new(HeartbeatEngine::new(
            registry.clone(),
            settings.heartbeat.clone(),
        ));
        let correlator = Arc::new(CommandCorrelator::new(settings.commands.max_pending));
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let router = MessageRouter::new(
            registry.clone(),
            heartbeat.clone(),
            correlator.clone(),
            events.clone(),
        );
        Self {
            settings,
            registry,
            heartbeat,
            correlator,
            router,
            events,
            primary: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    /// Drive one upgraded WebSocket from admission to cleanup.
    ///
    /// A connection arriving with a higher `conn_seq` for an already-held
    /// session supersedes the holder; a lower or equal one is refused
    /// before any state changes.
    pub async fn handle_connection(
        self: &Arc<Self>,
        mut socket: WebSocket,
        session: Option<String>,
        conn_seq: u64,
    ) {
        let cid = ids::connection_id();
        let session_id = session.unwrap_or_else(ids::session_id);
        let (tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let connection = Arc::new(EditorConnection::new(
            cid.clone(),
            conn_seq,
            Some(session_id.clone()),
            tx,
        ));

        let superseded = match self.registry.accept(&session_id, conn_seq, connection.clone()) {
            Admission::Rejected { reason } => {
                counter!("ws_rejected_total").increment(1);
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::DUPLICATE_SESSION,
                        reason: reason.into(),
                    })))
                    .await;
                return;
            }
            Admission::Replaced(old) => Some(old),
            Admission::Accepted => None,
        };

        connection.set_state(ConnectionState::Open);
        *self.primary.lock() = Some(connection.clone());

        // The old transport goes away only after its replacement is primary,
        // so there is never a moment with no primary connection.
        if let Some(old) = superseded {
            counter!("ws_superseded_total").increment(1);
            if !old.request_close(close_code::SUPERSEDED, "superseded by newer connection") {
                old.terminate();
            }
        }

        self.heartbeat.start();
        self.notify(true);

        counter!("ws_connections_total").increment(1);
        gauge!("ws_connections_active").increment(1.0);
        info!(cid = %cid, session = %session_id, conn_seq, "editor connected");

        // Queued before the pump starts, so it is the first frame out.
        let welcome = Envelope::new(
            "welcome",
            json!({
                "message": "Connected to Movesia Agent Server",
                "cid": cid,
                "session": session_id,
                "server_version": env!("CARGO_PKG_VERSION"),
            }),
            None,
        );
        let _ = connection.send_envelope(&welcome);

        session::run_socket(socket, outbound_rx, connection.clone(), self.clone()).await;

        self.cleanup(&connection, &session_id);
    }

    /// Tear down a departed connection.
    ///
    /// Pending commands are failed and change callbacks fired only when the
    /// departing connection was still primary; a superseded connection
    /// leaving must not disturb its replacement.
    fn cleanup(&self, connection: &Arc<EditorConnection>, session_id: &str) {
        connection.set_state(ConnectionState::Closed);

        let was_primary = {
            let mut primary = self.primary.lock();
            let held = primary
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, connection));
            if held {
                *primary = None;
            }
            held
        };

        let _ = self.registry.clear_if_match(session_id, connection);
        self.heartbeat.forget(&connection.cid);

        if was_primary {
            let _ = self.correlator.fail_all(CancelReason::ConnectionClosed);
            self.notify(false);
        }
        if self.registry.size() == 0 {
            self.heartbeat.stop();
        }

        counter!("ws_disconnections_total").increment(1);
        gauge!("ws_connections_active").decrement(1.0);
        histogram!("ws_connection_duration_seconds").record(connection.age().as_secs_f64());
        info!(cid = %connection.cid, was_primary, "editor disconnected");
    }

    /// Route one inbound text frame and settle any command waiting on its
    /// id.
    pub(crate) fn handle_inbound(&self, connection: &Arc<EditorConnection>, text: &str) {
        if let Some(envelope) = self.router.handle_message(connection, text) {
            let Envelope { id, body, .. } = envelope;
            let _ = self.correlator.resolve(&id, body);
        }
    }

    /// Send a command to the editor and wait for the reply echoing its id.
    pub async fn send_and_wait(
        &self,
        command_type: &str,
        body: Value,
        timeout_override: Option<Duration>,
    ) -> Result<Value, CommandError> {
        let connection = {
            let primary = self.primary.lock();
            match primary.as_ref() {
                Some(conn) if conn.state() == ConnectionState::Open => conn.clone(),
                _ => return Err(CommandError::NoConnection),
            }
        };

        let timeout = timeout_override
            .unwrap_or_else(|| Duration::from_millis(self.settings.commands.timeout_ms));
        let envelope = Envelope::new(command_type, body, connection.session_id());
        let reply = self.correlator.register(&envelope.id)?;

        if !connection.send_envelope(&envelope) {
            let _ = self.correlator.remove(&envelope.id);
            return Err(CommandError::SendFailed);
        }
        counter!("commands_sent_total").increment(1);
        let sent = Instant::now();

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(reply_body))) => {
                histogram!("command_roundtrip_seconds").record(sent.elapsed().as_secs_f64());
                Ok(reply_body)
            }
            Ok(Ok(Err(reason))) => Err(CommandError::Cancelled(reason)),
            // Sender dropped without a verdict; treat like a lost connection.
            Ok(Err(_)) => Err(CommandError::Cancelled(CancelReason::ConnectionClosed)),
            Err(_) => {
                let _ = self.correlator.remove(&envelope.id);
                counter!("command_timeouts_total").increment(1);
                warn!(command = command_type, ?timeout, "command timed out");
                Err(CommandError::Timeout {
                    command: command_type.to_string(),
                    elapsed: timeout,
                })
            }
        }
    }

    /// Close every connection and cancel pending commands for shutdown.
    pub fn close_all(&self) {
        self.heartbeat.stop();
        let cancelled = self.correlator.fail_all(CancelReason::Shutdown);
        if cancelled > 0 {
            info!(cancelled, "cancelled pending commands for shutdown");
        }
        for entry in self.registry.clear_all() {
            if !entry
                .connection
                .request_close(close_code::GOING_AWAY, "server shutdown")
            {
                entry.connection.terminate();
            }
        }
        *self.primary.lock() = None;
    }

    /// Whether a primary connection is open.
    pub fn is_connected(&self) -> bool {
        self.primary
            .lock()
            .as_ref()
            .is_some_and(|conn| conn.state() == ConnectionState::Open)
    }

    /// Project path the primary connection announced, if any.
    pub fn current_project(&self) -> Option<String> {
        self.primary
            .lock()
            .as_ref()
            .and_then(|conn| conn.project_path())
    }

    /// Whether the editor reported an in-progress compile.
    pub fn is_compiling(&self) -> bool {
        self.primary
            .lock()
            .as_ref()
            .is_some_and(|conn| conn.is_compiling.load(Ordering::Relaxed))
    }

    /// Number of live sessions in the registry.
    pub fn connection_count(&self) -> usize {
        self.registry.size()
    }

    /// Register a callback fired on every connect (`true`) and primary
    /// disconnect (`false`).
    pub fn on_connection_change(&self, callback: ConnectionCallback) {
        self.callbacks.lock().push(callback);
    }

    /// Subscribe to the forwarded editor event stream.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Envelope> {
        self.events.subscribe()
    }

    /// Time since the bridge was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn notify(&self, connected: bool) {
        for callback in self.callbacks.lock().iter() {
            callback(connected);
        }
    }
}

// ───── Tests ─────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicUsize;

    fn bridge() -> Arc<EditorBridge> {
        Arc::new(EditorBridge::new(MovesiaSettings::default()))
    }

    /// Install a connection the way `handle_connection` would, without a
    /// real socket.
    fn install(
        bridge: &EditorBridge,
        session: &str,
        conn_seq: u64,
    ) -> (Arc<EditorConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        let conn = Arc::new(EditorConnection::new(
            ids::connection_id(),
            conn_seq,
            Some(session.to_string()),
            tx,
        ));
        let admission = bridge.registry.accept(session, conn_seq, conn.clone());
        assert!(!matches!(admission, Admission::Rejected { .. }));
        conn.set_state(ConnectionState::Open);
        *bridge.primary.lock() = Some(conn.clone());
        (conn, rx)
    }

    fn recv_envelope(rx: &mut mpsc::Receiver<Outbound>) -> Envelope {
        match rx.try_recv().expect("expected a queued frame") {
            Outbound::Text(text) => Envelope::parse(&text).expect("frame parses"),
            Outbound::Close { code, reason } => {
                panic!("expected text frame, got close {code}: {reason}")
            }
        }
    }

    fn reply_frame(id: &str, body: Value) -> String {
        json!({
            "source": "unity",
            "type": "command_result",
            "ts": 1_700_000_000,
            "id": id,
            "body": body,
        })
        .to_string()
    }

    #[tokio::test]
    async fn send_without_connection_fails_fast() {
        let bridge = bridge();
        let err = bridge
            .send_and_wait("execute_menu_item", json!({}), None)
            .await
            .unwrap_err();
        assert_matches!(err, CommandError::NoConnection);
    }

    #[tokio::test]
    async fn send_and_wait_resolves_on_echoed_id() {
        let bridge = bridge();
        let (conn, mut rx) = install(&bridge, "sess_a", 1);

        let pending = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .send_and_wait(
                        "execute_menu_item",
                        json!({"path": "File/Save"}),
                        Some(Duration::from_secs(1)),
                    )
                    .await
            })
        };

        // The command frame carries the session and a fresh id.
        let command = loop {
            if let Ok(frame) = rx.try_recv() {
                match frame {
                    Outbound::Text(text) => break Envelope::parse(&text).unwrap(),
                    Outbound::Close { .. } => panic!("unexpected close"),
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        };
        assert_eq!(command.message_type, "execute_menu_item");
        assert_eq!(command.session.as_deref(), Some("sess_a"));

        bridge.handle_inbound(&conn, &reply_frame(&command.id, json!({"ok": true})));

        let reply = pending.await.unwrap().unwrap();
        assert_eq!(reply["ok"], true);
        assert_eq!(bridge.correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_and_wait_times_out_and_unregisters() {
        let bridge = bridge();
        let (_conn, _rx) = install(&bridge, "sess_a", 1);

        let err = bridge
            .send_and_wait("read_console", json!({}), Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert_matches!(err, CommandError::Timeout { ref command, .. } if command == "read_console");
        assert_eq!(bridge.correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn compile_start_cancels_in_flight_command() {
        let bridge = bridge();
        let (conn, _rx) = install(&bridge, "sess_a", 1);

        let pending = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge
                    .send_and_wait("execute_menu_item", json!({}), Some(Duration::from_secs(5)))
                    .await
            })
        };

        // Wait for the command to register before injecting the compile.
        while bridge.correlator.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        let compile = json!({
            "source": "unity",
            "type": "compile_started",
            "ts": 1,
            "id": "msg_c",
            "body": {},
        })
        .to_string();
        bridge.handle_inbound(&conn, &compile);

        let err = pending.await.unwrap().unwrap_err();
        assert_matches!(err, CommandError::Cancelled(CancelReason::CompilationStarted));
        assert!(bridge.is_compiling());
    }

    #[tokio::test]
    async fn primary_cleanup_fails_pending_and_notifies() {
        let bridge = bridge();
        let (conn, _rx) = install(&bridge, "sess_a", 1);

        let last_change = Arc::new(Mutex::new(None::<bool>));
        let seen = last_change.clone();
        bridge.on_connection_change(Box::new(move |connected| {
            *seen.lock() = Some(connected);
        }));

        let reply = bridge.correlator.register("cmd_1").unwrap();
        bridge.cleanup(&conn, "sess_a");

        assert_matches!(reply.await.unwrap(), Err(CancelReason::ConnectionClosed));
        assert_eq!(*last_change.lock(), Some(false));
        assert!(!bridge.is_connected());
        assert_eq!(bridge.connection_count(), 0);
        assert!(!bridge.heartbeat.is_running());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn superseded_cleanup_leaves_replacement_untouched() {
        let bridge = bridge();
        let (old, _old_rx) = install(&bridge, "sess_a", 1);
        let (new, _new_rx) = install(&bridge, "sess_a", 2);

        let notified = Arc::new(AtomicUsize::new(0));
        let count = notified.clone();
        bridge.on_connection_change(Box::new(move |_| {
            let _ = count.fetch_add(1, Ordering::Relaxed);
        }));

        let _reply = bridge.correlator.register("cmd_1").unwrap();
        bridge.cleanup(&old, "sess_a");

        // Commands riding the new primary survive the old socket's exit.
        assert_eq!(bridge.correlator.pending_count(), 1);
        assert_eq!(notified.load(Ordering::Relaxed), 0);
        assert!(bridge.is_connected());
        assert_eq!(bridge.connection_count(), 1);
        assert!(Arc::ptr_eq(bridge.primary.lock().as_ref().unwrap(), &new));
    }

    #[tokio::test]
    async fn close_all_sweeps_every_session() {
        let bridge = bridge();
        let (_a, mut rx_a) = install(&bridge, "sess_a", 1);
        let (_b, mut rx_b) = install(&bridge, "sess_b", 1);
        let reply = bridge.correlator.register("cmd_1").unwrap();

        bridge.close_all();

        assert_matches!(reply.await.unwrap(), Err(CancelReason::Shutdown));
        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                Outbound::Close { code, reason } => {
                    assert_eq!(code, close_code::GOING_AWAY);
                    assert_eq!(reason, "server shutdown");
                }
                Outbound::Text(text) => panic!("expected close, got {text}"),
            }
        }
        assert_eq!(bridge.connection_count(), 0);
        assert!(!bridge.is_connected());
        assert!(!bridge.heartbeat.is_running());
    }

    #[tokio::test]
    async fn status_accessors_follow_primary() {
        let bridge = bridge();
        assert!(!bridge.is_connected());
        assert!(bridge.current_project().is_none());
        assert!(!bridge.is_compiling());

        let (conn, _rx) = install(&bridge, "sess_a", 1);
        conn.bind_project("/work/game".to_string());
        assert!(bridge.is_connected());
        assert_eq!(bridge.current_project().as_deref(), Some("/work/game"));

        let events = bridge.subscribe_events();
        drop(events);
        assert!(bridge.uptime() >= Duration::ZERO);
    }

    #[tokio::test]
    async fn forwarded_event_reaches_subscribers() {
        let bridge = bridge();
        let (conn, mut rx) = install(&bridge, "sess_a", 1);
        let mut events = bridge.subscribe_events();

        let frame = json!({
            "source": "unity",
            "type": "scene_saved",
            "ts": 1,
            "id": "msg_1",
            "body": {"scene": "Main.unity"},
        })
        .to_string();
        bridge.handle_inbound(&conn, &frame);

        let event = events.try_recv().unwrap();
        assert_eq!(event.message_type, "scene_saved");
        assert_eq!(event.body["scene"], "Main.unity");

        // The ack went back out on the wire.
        let ack = recv_envelope(&mut rx);
        assert_eq!(ack.message_type, "ack");
        assert_eq!(ack.id, "msg_1");
    }
}

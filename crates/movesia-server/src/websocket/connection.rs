//! Editor connection state and outbound send handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use movesia_core::{ConnectionState, Envelope};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Frame queued for a connection's WebSocket write task.
#[derive(Clone, Debug)]
pub enum Outbound {
    /// Serialized envelope to send as a text frame.
    Text(Arc<String>),
    /// Close frame; the write task sends it and then exits.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason sent to the peer.
        reason: String,
    },
}

/// Represents a connected editor WebSocket.
///
/// Health fields are written by the read loop and the heartbeat sweep
/// concurrently, so they are atomics or short-lived mutexes. The kill
/// token tears down both socket tasks when cancelled.
pub struct EditorConnection {
    /// Short connection ID (lowercase alphanumeric).
    pub cid: String,
    /// Connection sequence used for monotonic takeover.
    pub conn_seq: u64,
    /// Bound session ID; rebound when an envelope carries `session`.
    session_id: Mutex<Option<String>>,
    /// Project path reported by the editor's `hello` message.
    project_path: Mutex<Option<String>>,
    /// Editor version reported by the editor's `hello` message.
    editor_version: Mutex<Option<String>>,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the editor has responded since the last probe.
    pub is_alive: AtomicBool,
    /// Consecutive probes with no response.
    pub missed_pongs: AtomicU32,
    /// When the last valid frame was received.
    last_seen: Mutex<Instant>,
    /// Most recent measured probe round-trip.
    latency: Mutex<Option<Duration>>,
    /// When a close was first requested (for stuck-close detection).
    closing_since: Mutex<Option<Instant>>,
    /// Lifecycle state.
    state: Mutex<ConnectionState>,
    /// Whether the editor reported an in-progress compilation.
    pub is_compiling: AtomicBool,
    /// Count of frames dropped due to a full channel.
    pub dropped_messages: AtomicU64,
    kill: CancellationToken,
}

impl EditorConnection {
    /// Create a new connection in the `Connecting` state.
    pub fn new(cid: String, conn_seq: u64, session_id: Option<String>, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            cid,
            conn_seq,
            session_id: Mutex::new(session_id),
            project_path: Mutex::new(None),
            editor_version: Mutex::new(None),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            missed_pongs: AtomicU32::new(0),
            last_seen: Mutex::new(now),
            latency: Mutex::new(None),
            closing_since: Mutex::new(None),
            state: Mutex::new(ConnectionState::Connecting),
            is_compiling: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
            kill: CancellationToken::new(),
        }
    }

    /// Bind this connection to a session.
    pub fn bind_session(&self, session_id: String) {
        *self.session_id.lock() = Some(session_id);
    }

    /// Get the current bound session ID.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Record the project path reported by the editor.
    pub fn bind_project(&self, path: String) {
        *self.project_path.lock() = Some(path);
    }

    /// Get the bound project path, if the editor reported one.
    pub fn project_path(&self) -> Option<String> {
        self.project_path.lock().clone()
    }

    /// Record the editor version reported by the editor.
    pub fn set_editor_version(&self, version: String) {
        *self.editor_version.lock() = Some(version);
    }

    /// Get the reported editor version.
    pub fn editor_version(&self) -> Option<String> {
        self.editor_version.lock().clone()
    }

    /// Queue a frame for the write task.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped frame counter.
    pub fn send(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Queue a serialized envelope as a text frame.
    pub fn send_text(&self, payload: Arc<String>) -> bool {
        self.send(Outbound::Text(payload))
    }

    /// Serialize an envelope and queue it as a text frame.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match serde_json::to_string(envelope) {
            Ok(json) => self.send_text(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Request a graceful close.
    ///
    /// Transitions to `Closing`, stamps `closing_since` (keeping the
    /// earliest stamp so stuck closes are detected from the first
    /// request), and queues a close frame. Returns `false` if the frame
    /// could not be queued.
    pub fn request_close(&self, code: u16, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if matches!(*state, ConnectionState::Connecting | ConnectionState::Open) {
                *state = ConnectionState::Closing;
            }
        }
        let _ = self.closing_since.lock().get_or_insert_with(Instant::now);
        self.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        })
    }

    /// Forcefully tear down the connection's socket tasks.
    pub fn terminate(&self) {
        self.kill.cancel();
    }

    /// Clone of the kill token, for the socket tasks to select on.
    pub fn kill_token(&self) -> CancellationToken {
        self.kill.clone()
    }

    /// Whether `terminate` has been called.
    pub fn is_terminated(&self) -> bool {
        self.kill.is_cancelled()
    }

    /// Record activity: a valid frame arrived.
    pub fn update_seen(&self) {
        *self.last_seen.lock() = Instant::now();
        self.is_alive.store(true, Ordering::Relaxed);
        self.missed_pongs.store(0, Ordering::Relaxed);
    }

    /// Record a probe response, measuring round-trip from `ping_sent`.
    pub fn mark_pong(&self, ping_sent: Instant) {
        self.is_alive.store(true, Ordering::Relaxed);
        self.missed_pongs.store(0, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
        *self.latency.lock() = Some(ping_sent.elapsed());
    }

    /// Duration since the last valid frame.
    pub fn idle(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Most recent probe round-trip, if one was measured.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Set the lifecycle state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// How long the connection has been stuck closing, if it is.
    pub fn closing_for(&self) -> Option<Duration> {
        self.closing_since.lock().map(|since| since.elapsed())
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }
}

// ───── Tests ─────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn make_connection() -> (EditorConnection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = EditorConnection::new("abcd1234".into(), 1, Some("sess_1".into()), tx);
        (conn, rx)
    }

    #[test]
    fn create_connection() {
        let (conn, _rx) = make_connection();
        assert_eq!(conn.cid, "abcd1234");
        assert_eq!(conn.conn_seq, 1);
        assert_eq!(conn.session_id().as_deref(), Some("sess_1"));
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.is_alive.load(Ordering::Relaxed));
        assert!(!conn.is_compiling.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn send_text_success() {
        let (conn, mut rx) = make_connection();
        let sent = conn.send_text(Arc::new("hello".into()));
        assert!(sent);
        let frame = rx.recv().await.unwrap();
        assert_matches!(frame, Outbound::Text(payload) if &*payload == "hello");
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false() {
        let (tx, rx) = mpsc::channel(32);
        let conn = EditorConnection::new("efgh5678".into(), 1, None, tx);
        drop(rx);
        let sent = conn.send_text(Arc::new("hello".into()));
        assert!(!sent);
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_to_full_channel_counts_drop() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = EditorConnection::new("ijkl9012".into(), 1, None, tx);
        assert!(conn.send_text(Arc::new("msg1".into())));
        // Channel is now full
        assert!(!conn.send_text(Arc::new("msg2".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_envelope_serializes() {
        let (conn, mut rx) = make_connection();
        let envelope = Envelope::new("hb", serde_json::json!({}), None);
        assert!(conn.send_envelope(&envelope));
        let frame = rx.recv().await.unwrap();
        let Outbound::Text(payload) = frame else {
            panic!("expected text frame");
        };
        let parsed = Envelope::parse(&payload).unwrap();
        assert_eq!(parsed.message_type, "hb");
        assert_eq!(parsed.id, envelope.id);
    }

    #[test]
    fn rebind_session() {
        let (conn, _rx) = make_connection();
        conn.bind_session("sess_2".into());
        assert_eq!(conn.session_id().as_deref(), Some("sess_2"));
    }

    #[test]
    fn bind_project_and_version() {
        let (conn, _rx) = make_connection();
        assert!(conn.project_path().is_none());
        conn.bind_project("/projects/game".into());
        conn.set_editor_version("2022.3.10f1".into());
        assert_eq!(conn.project_path().as_deref(), Some("/projects/game"));
        assert_eq!(conn.editor_version().as_deref(), Some("2022.3.10f1"));
    }

    #[test]
    fn update_seen_resets_health() {
        let (conn, _rx) = make_connection();
        conn.is_alive.store(false, Ordering::Relaxed);
        conn.missed_pongs.store(2, Ordering::Relaxed);
        conn.update_seen();
        assert!(conn.is_alive.load(Ordering::Relaxed));
        assert_eq!(conn.missed_pongs.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn mark_pong_measures_latency() {
        let (conn, _rx) = make_connection();
        conn.is_alive.store(false, Ordering::Relaxed);
        conn.missed_pongs.store(1, Ordering::Relaxed);
        let ping_sent = Instant::now() - Duration::from_millis(25);
        conn.mark_pong(ping_sent);
        assert!(conn.is_alive.load(Ordering::Relaxed));
        assert_eq!(conn.missed_pongs.load(Ordering::Relaxed), 0);
        assert!(conn.latency().unwrap() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn request_close_transitions_and_queues_frame() {
        let (conn, mut rx) = make_connection();
        conn.set_state(ConnectionState::Open);
        assert!(conn.request_close(4001, "superseded by newer connection"));
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(conn.closing_for().is_some());
        let frame = rx.recv().await.unwrap();
        assert_matches!(
            frame,
            Outbound::Close { code: 4001, reason } if reason == "superseded by newer connection"
        );
    }

    #[test]
    fn request_close_keeps_first_stamp() {
        let (conn, _rx) = make_connection();
        conn.set_state(ConnectionState::Open);
        assert!(conn.request_close(1001, "idle timeout"));
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.request_close(1011, "terminated"));
        // First stamp survives, so the stuck-close clock keeps counting.
        assert!(conn.closing_for().unwrap() >= Duration::from_millis(10));
    }

    #[test]
    fn request_close_does_not_reopen_closed() {
        let (conn, _rx) = make_connection();
        conn.set_state(ConnectionState::Closed);
        let _ = conn.request_close(1000, "done");
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn terminate_cancels_kill_token() {
        let (conn, _rx) = make_connection();
        let token = conn.kill_token();
        assert!(!token.is_cancelled());
        conn.terminate();
        assert!(token.is_cancelled());
        assert!(conn.is_terminated());
    }

    #[test]
    fn idle_increases() {
        let (conn, _rx) = make_connection();
        let idle1 = conn.idle();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.idle() > idle1);
    }

    #[test]
    fn connection_age_increases() {
        let (conn, _rx) = make_connection();
        let age1 = conn.age();
        std::thread::sleep(Duration::from_millis(10));
        assert!(conn.age() > age1);
    }
}

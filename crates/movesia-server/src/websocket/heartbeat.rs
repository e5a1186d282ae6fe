//! Connection health sweeps with compilation-aware suspension.
//!
//! Unity's WebSocket client does not reliably answer protocol-level pings,
//! so liveness uses application-level `hb`/`pong` envelopes. A background
//! task sweeps every registered connection on an interval; the whole sweep
//! is skipped while suspended, which is how compilation windows (editor
//! frozen, socket silent) avoid false disconnects.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use metrics::counter;
use movesia_core::{close_code, ConnectionState, Envelope};
use movesia_settings::HeartbeatSettings;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::EditorConnection;
use super::registry::SessionRegistry;

struct SweepTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic health checks over every connection in the registry.
pub struct HeartbeatEngine {
    registry: Arc<SessionRegistry>,
    config: HeartbeatSettings,
    /// cid → when the probe was sent, for round-trip measurement.
    pending_pings: Mutex<HashMap<String, Instant>>,
    /// Sweeps are skipped while the current instant is before this.
    suspended_until: Mutex<Option<Instant>>,
    task: Mutex<Option<SweepTask>>,
}

impl HeartbeatEngine {
    /// Create an engine over `registry` with the given tuning.
    pub fn new(registry: Arc<SessionRegistry>, config: HeartbeatSettings) -> Self {
        Self {
            registry,
            config,
            pending_pings: Mutex::new(HashMap::new()),
            suspended_until: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Heartbeat tuning currently in effect.
    pub fn config(&self) -> &HeartbeatSettings {
        &self.config
    }

    /// Start the background sweep task. No-op when already running.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(engine.config.sweep_interval_ms));
            // Consume the immediate first tick.
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if engine.is_suspended() {
                            continue;
                        }
                        engine.sweep();
                    }
                    () = token.cancelled() => break,
                }
            }
        });

        info!(interval_ms = self.config.sweep_interval_ms, "heartbeat started");
        *task = Some(SweepTask { cancel, handle });
    }

    /// Stop the sweep task if running.
    pub fn stop(&self) {
        if let Some(SweepTask { cancel, handle }) = self.task.lock().take() {
            cancel.cancel();
            drop(handle);
            info!("heartbeat stopped");
        }
    }

    /// Whether the sweep task is currently running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Suspend sweeps for `duration` from now.
    ///
    /// Extends only: a shorter suspension never cuts an existing window
    /// short, so overlapping compilation events keep the longest cover.
    pub fn suspend(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut suspended = self.suspended_until.lock();
        if suspended.is_none_or(|current| until > current) {
            debug!(?duration, "heartbeat suspended");
            *suspended = Some(until);
        }
    }

    /// Whether sweeps are currently suspended.
    pub fn is_suspended(&self) -> bool {
        self.suspended_until
            .lock()
            .is_some_and(|until| Instant::now() < until)
    }

    /// Record a pong from a connection.
    ///
    /// Pops the outstanding probe and measures the round-trip; an
    /// unsolicited pong (client-initiated keepalive) still counts as
    /// activity.
    pub fn handle_pong(&self, connection: &EditorConnection) {
        let pending = self.pending_pings.lock().remove(&connection.cid);
        match pending {
            Some(sent) => connection.mark_pong(sent),
            None => connection.update_seen(),
        }
    }

    /// Drop any outstanding probe for a connection that went away.
    pub fn forget(&self, cid: &str) {
        let _ = self.pending_pings.lock().remove(cid);
    }

    /// Run one sweep over every registered connection.
    ///
    /// Each connection is checked independently, so one misbehaving entry
    /// cannot block the rest of the sweep.
    fn sweep(&self) {
        for entry in self.registry.snapshot() {
            self.check_connection(&entry.connection);
        }
    }

    fn check_connection(&self, conn: &Arc<EditorConnection>) {
        // A close was requested but never completed: give the handshake a
        // grace window, then force the teardown.
        if conn.state() == ConnectionState::Closing {
            let stuck = conn
                .closing_for()
                .is_some_and(|d| d > Duration::from_millis(self.config.closing_force_kill_ms));
            if stuck {
                warn!(cid = %conn.cid, "close handshake stuck, terminating");
                self.terminate(conn);
            }
            return;
        }

        if conn.state() != ConnectionState::Open {
            return;
        }

        let idle = conn.idle();

        if idle > Duration::from_millis(self.config.max_idle_ms) {
            info!(cid = %conn.cid, idle_secs = idle.as_secs(), "closing idle connection");
            counter!("heartbeat_idle_closes_total").increment(1);
            let _ = conn.request_close(close_code::GOING_AWAY, "idle timeout");
            return;
        }

        // Recently active: no probe needed, reset health.
        if idle <= Duration::from_millis(self.config.ping_after_idle_ms) {
            conn.is_alive.store(true, Ordering::Relaxed);
            conn.missed_pongs.store(0, Ordering::Relaxed);
            return;
        }

        // Idle past the probe threshold: escalate if the last probe went
        // unanswered, otherwise (or while still under the limit) probe again.
        if !conn.is_alive.load(Ordering::Relaxed) {
            let missed = conn.missed_pongs.fetch_add(1, Ordering::Relaxed) + 1;
            if missed >= self.config.max_missed_pongs {
                warn!(cid = %conn.cid, missed, "editor unresponsive, terminating");
                self.terminate(conn);
                return;
            }
        }

        self.send_probe(conn);
    }

    fn send_probe(&self, conn: &Arc<EditorConnection>) {
        conn.is_alive.store(false, Ordering::Relaxed);
        let probe = Envelope::new("hb", serde_json::json!({}), None);
        let _ = self
            .pending_pings
            .lock()
            .insert(conn.cid.clone(), Instant::now());
        if conn.send_envelope(&probe) {
            counter!("heartbeat_pings_total").increment(1);
            debug!(cid = %conn.cid, "probe sent");
        } else {
            // Frame never left: drop the record so a later pong is not
            // mismatched against a probe that was not delivered.
            let _ = self.pending_pings.lock().remove(&conn.cid);
        }
    }

    fn terminate(&self, conn: &Arc<EditorConnection>) {
        self.forget(&conn.cid);
        counter!("heartbeat_terminations_total").increment(1);
        let _ = conn.request_close(close_code::INTERNAL_ERROR, "terminated");
        conn.terminate();
    }
}

// ───── Tests ─────

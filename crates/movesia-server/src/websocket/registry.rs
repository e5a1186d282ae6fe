//! Session registry with monotonic connection takeover.
//!
//! Each session holds at most one connection. A newer connection (higher
//! `conn_seq`) supersedes the current holder; an older or equal one is
//! rejected. The registry decides admission under its mutex but never
//! touches sockets — callers close superseded or rejected connections
//! after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::connection::EditorConnection;

/// One live session and the connection that owns it.
#[derive(Clone)]
pub struct SessionEntry {
    /// Session identifier.
    pub session_id: String,
    /// Sequence of the connection that won the session.
    pub conn_seq: u64,
    /// The owning connection.
    pub connection: Arc<EditorConnection>,
    /// When this entry was installed.
    pub created_at: Instant,
}

/// Admission decision for an incoming connection.
pub enum Admission {
    /// No previous holder; the connection now owns the session.
    Accepted,
    /// A newer sequence took over. The caller must close the returned
    /// previous holder after installing the new connection.
    Replaced(Arc<EditorConnection>),
    /// Stale sequence; the caller must close the incoming socket.
    Rejected {
        /// Rejection reason, naming both sequences.
        reason: String,
    },
}

struct Inner {
    sessions: HashMap<String, SessionEntry>,
    /// project path → owning session, maintained from `hello` messages.
    projects: HashMap<String, String>,
}

/// Tracks which connection owns each session.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                projects: HashMap::new(),
            }),
        }
    }

    /// Decide admission for an incoming connection.
    pub fn accept(
        &self,
        session_id: &str,
        conn_seq: u64,
        connection: Arc<EditorConnection>,
    ) -> Admission {
        let mut inner = self.inner.lock();

        let Some(existing) = inner.sessions.get(session_id) else {
            let _ = inner.sessions.insert(
                session_id.to_string(),
                SessionEntry {
                    session_id: session_id.to_string(),
                    conn_seq,
                    connection,
                    created_at: Instant::now(),
                },
            );
            info!(session = short(session_id), seq = conn_seq, "session accepted");
            return Admission::Accepted;
        };

        if conn_seq <= existing.conn_seq {
            warn!(
                session = short(session_id),
                seq = conn_seq,
                current = existing.conn_seq,
                "rejected stale connection"
            );
            return Admission::Rejected {
                reason: format!(
                    "Connection sequence {conn_seq} <= current {}",
                    existing.conn_seq
                ),
            };
        }

        let old_seq = existing.conn_seq;
        let old = existing.connection.clone();
        let _ = inner.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                session_id: session_id.to_string(),
                conn_seq,
                connection,
                created_at: Instant::now(),
            },
        );
        info!(
            session = short(session_id),
            old_seq,
            new_seq = conn_seq,
            "superseding connection"
        );
        Admission::Replaced(old)
    }

    /// Remove a session only if `connection` is still its holder.
    ///
    /// Identity is pointer equality, so a connection that was already
    /// superseded cannot clear the entry of its replacement. Project
    /// bindings pointing at the session are removed with it.
    pub fn clear_if_match(&self, session_id: &str, connection: &Arc<EditorConnection>) -> bool {
        let mut inner = self.inner.lock();
        let holds = inner
            .sessions
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(&entry.connection, connection));
        if !holds {
            return false;
        }
        let _ = inner.sessions.remove(session_id);
        inner.projects.retain(|_, owner| owner != session_id);
        info!(session = short(session_id), "cleared session");
        true
    }

    /// Get the entry for a session.
    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.inner.lock().sessions.get(session_id).cloned()
    }

    /// All current entries, for iteration outside the lock.
    pub fn snapshot(&self) -> Vec<SessionEntry> {
        self.inner.lock().sessions.values().cloned().collect()
    }

    /// Number of live sessions.
    pub fn size(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Drain every session, returning the removed entries so the caller
    /// can close their connections outside the lock.
    pub fn clear_all(&self) -> Vec<SessionEntry> {
        let mut inner = self.inner.lock();
        inner.projects.clear();
        let entries: Vec<SessionEntry> = inner.sessions.drain().map(|(_, entry)| entry).collect();
        info!(count = entries.len(), "cleared all sessions");
        entries
    }

    /// Bind a project path to a session.
    ///
    /// Fails with the owning session id when a different live session
    /// already holds the project. A stale binding whose owner is gone is
    /// silently replaced.
    pub fn bind_project(&self, project_path: &str, session_id: &str) -> Result<(), String> {
        let mut inner = self.inner.lock();
        if let Some(owner) = inner.projects.get(project_path) {
            if owner != session_id && inner.sessions.contains_key(owner) {
                return Err(owner.clone());
            }
        }
        let _ = inner
            .projects
            .insert(project_path.to_string(), session_id.to_string());
        Ok(())
    }

    /// Session currently bound to a project path.
    pub fn session_for_project(&self, project_path: &str) -> Option<String> {
        self.inner.lock().projects.get(project_path).cloned()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// First eight characters of a session id, for log lines.
fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

// ───── Tests ─────

//! Pending-command correlation by envelope id.

use std::collections::HashMap;

use movesia_core::{CancelReason, CommandError};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

/// Reply slot handed to a caller waiting on a command.
pub type ReplyReceiver = oneshot::Receiver<Result<Value, CancelReason>>;
type ReplySender = oneshot::Sender<Result<Value, CancelReason>>;

/// Matches replies to in-flight commands.
///
/// The envelope `id` is the sole correlation key: a reply is recognized
/// purely by echoing the request's id, with no separate reply-to field on
/// the wire.
pub struct CommandCorrelator {
    pending: Mutex<HashMap<String, ReplySender>>,
    max_pending: usize,
}

impl CommandCorrelator {
    /// Create a correlator that admits at most `max_pending` in-flight
    /// commands.
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            max_pending,
        }
    }

    /// Register an in-flight command and get the slot its reply will
    /// arrive on. Fails when the pending table is full.
    pub fn register(&self, id: &str) -> Result<ReplyReceiver, CommandError> {
        let mut pending = self.pending.lock();
        if pending.len() >= self.max_pending {
            return Err(CommandError::TooManyPending(self.max_pending));
        }
        let (tx, rx) = oneshot::channel();
        let _ = pending.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Resolve a pending command with a reply body.
    ///
    /// Returns `true` when a command was waiting on `id`. A waiter that
    /// already gave up (timed out) is not an error.
    pub fn resolve(&self, id: &str, body: Value) -> bool {
        let Some(tx) = self.pending.lock().remove(id) else {
            return false;
        };
        let _ = tx.send(Ok(body));
        true
    }

    /// Drop a pending command without resolving it (timeout path).
    pub fn remove(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Fail every pending command with `reason`, returning how many were
    /// cancelled. Senders are drained under the lock but notified outside
    /// it.
    pub fn fail_all(&self, reason: CancelReason) -> usize {
        let drained: Vec<ReplySender> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(reason));
        }
        if count > 0 {
            debug!(count, reason = %reason, "cancelled pending commands");
        }
        count
    }

    /// Number of commands currently awaiting replies.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

// ───── Tests ─────

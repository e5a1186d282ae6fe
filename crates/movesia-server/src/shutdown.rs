//! Coordinated graceful shutdown.
//!
//! One coordinator hands out child cancellation tokens; signalling it stops
//! the HTTP listener, the liveness sweep, and any other background task
//! holding a token.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time to wait for background tasks before giving up.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Fans a single shutdown signal out to every background task.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Fresh coordinator with no shutdown signalled.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Child token for a task to select on.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Signal every token holder to stop.
    pub fn shutdown(&self) {
        info!("shutdown signalled");
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then wait for `handles` to finish within `timeout`
    /// (default [`DEFAULT_SHUTDOWN_TIMEOUT`]). Tasks still running at the
    /// deadline are abandoned, not aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        self.shutdown();
        let deadline = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        if tokio::time::timeout(deadline, join_all(handles)).await.is_err() {
            warn!(
                ?deadline,
                "background tasks did not finish before the shutdown deadline"
            );
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ───── Tests ─────

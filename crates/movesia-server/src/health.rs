//! Health check payload for `GET /health`.

use std::time::Instant;

use serde::Serialize;

/// Liveness payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server can answer at all.
    pub status: &'static str,
    /// Server crate version.
    pub version: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live editor sessions.
    pub connections: usize,
    /// Whether the editor reported an in-progress compile.
    pub compiling: bool,
}

/// Build the health payload from live server state.
pub fn health_check(start_time: Instant, connections: usize, compiling: bool) -> HealthResponse {
    HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        compiling,
    }
}

// ───── Tests ─────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn health_reports_ok() {
        let response = health_check(Instant::now(), 2, false);
        assert_eq!(response.status, "ok");
        assert_eq!(response.connections, 2);
        assert!(!response.compiling);
        assert!(!response.version.is_empty());
    }

    #[test]
    fn uptime_counts_from_start_time() {
        let started = Instant::now() - Duration::from_secs(90);
        let response = health_check(started, 0, true);
        assert!(response.uptime_secs >= 90);
        assert!(response.compiling);
    }

    #[test]
    fn serializes_to_flat_json() {
        let response = health_check(Instant::now(), 1, false);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["connections"], 1);
        assert_eq!(json["compiling"], false);
    }
}

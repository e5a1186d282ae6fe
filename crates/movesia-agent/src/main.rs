//! # movesia-agent
//!
//! Movesia agent server binary — loads settings, wires the editor bridge,
//! and starts the HTTP/WebSocket server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use movesia_server::{EditorBridge, MovesiaServer, ShutdownCoordinator, metrics};
use movesia_settings::MovesiaSettings;
use tracing::info;

/// Movesia agent server.
#[derive(Parser, Debug)]
#[command(name = "movesia-agent", about = "Movesia agent server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (default `~/.movesia/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log level when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

/// Load settings, falling back to defaults on a broken file, and apply
/// command-line overrides.
fn resolve_settings(args: &Cli) -> MovesiaSettings {
    let mut settings = match &args.settings {
        Some(path) => movesia_settings::load_settings_from_path(path).unwrap_or_default(),
        None => movesia_settings::load_settings().unwrap_or_default(),
    };
    if let Some(host) = &args.host {
        settings.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    settings
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = resolve_settings(&args);

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    movesia_core::logging::init_subscriber(level);

    let metrics_handle = metrics::install_recorder();
    let bridge = Arc::new(EditorBridge::new(settings.clone()));
    bridge.on_connection_change(Box::new(|connected| {
        if connected {
            info!("unity editor connected");
        } else {
            info!("unity editor disconnected");
        }
    }));

    let shutdown = ShutdownCoordinator::new();
    let server = MovesiaServer::new(settings, bridge.clone(), metrics_handle);
    let handle = server
        .listen(shutdown.token())
        .await
        .context("failed to bind server")?;
    info!("Movesia agent listening on http://{}", handle.addr);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    info!("shutting down");
    bridge.close_all();
    shutdown.graceful_shutdown(vec![handle.task], None).await;
    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["movesia-agent"]);
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(cli.settings.is_none());
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn cli_overrides() {
        let cli = Cli::parse_from([
            "movesia-agent",
            "--host",
            "0.0.0.0",
            "--port",
            "9100",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.port, Some(9100));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn cli_settings_path() {
        let cli = Cli::parse_from(["movesia-agent", "--settings", "/tmp/custom.json"]);
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/custom.json")));
    }

    #[test]
    fn overrides_apply_on_top_of_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9200}}"#).unwrap();

        let cli = Cli::parse_from([
            "movesia-agent",
            "--settings",
            path.to_str().unwrap(),
            "--host",
            "0.0.0.0",
        ]);
        let settings = resolve_settings(&cli);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9200);
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() {
        let cli = Cli::parse_from([
            "movesia-agent",
            "--settings",
            "/tmp/movesia-test-no-such-settings.json",
        ]);
        let settings = resolve_settings(&cli);
        assert_eq!(settings.server.port, MovesiaSettings::default().server.port);
    }

    #[tokio::test]
    async fn server_boots_and_responds() {
        let mut settings = MovesiaSettings::default();
        settings.server.host = "127.0.0.1".to_string();
        settings.server.port = 0;

        // A standalone recorder keeps the global one free for other tests.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let bridge = Arc::new(EditorBridge::new(settings.clone()));
        let shutdown = ShutdownCoordinator::new();
        let server = MovesiaServer::new(settings, bridge.clone(), metrics_handle);
        let handle = server.listen(shutdown.token()).await.unwrap();

        let resp = reqwest::get(format!("http://{}/health", handle.addr))
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        let resp = reqwest::get(format!("http://{}/unity/status", handle.addr))
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "disconnected");
        assert_eq!(body["connections"], 0);

        bridge.close_all();
        shutdown
            .graceful_shutdown(vec![handle.task], Some(std::time::Duration::from_secs(5)))
            .await;
    }
}

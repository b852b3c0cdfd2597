//! # beacon
//!
//! Machine status hub binary. Loads settings, opens the inventory database,
//! starts the hub, the status publisher and the HTTP/WebSocket server, then
//! waits for a shutdown signal.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use beacon_core::StatusSource;
use beacon_server::{BeaconServer, Hub, ServerConfig, ShutdownCoordinator, StatusPublisher};
use beacon_settings::{BeaconSettings, SettingsError};
use beacon_store::{Database, MachineRepo};
use beacon_telemetry::{TelemetryConfig, init_telemetry};
use clap::Parser;

/// Beacon machine status hub.
#[derive(Parser, Debug)]
#[command(name = "beacon", about = "Machine status hub")]
struct Cli {
    /// Settings file (defaults to `~/.beacon/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, `0` for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` inventory database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Do not run the periodic status publisher.
    #[arg(long)]
    no_monitor: bool,
}

impl Cli {
    /// Load the settings layers, then apply command-line overrides on top.
    fn resolve_settings(&self) -> (BeaconSettings, Option<SettingsError>) {
        let loaded = match &self.config {
            Some(path) => beacon_settings::load_settings_from_path(path),
            None => beacon_settings::load_settings(),
        };
        let (mut settings, load_error) = match loaded {
            Ok(settings) => (settings, None),
            Err(e) => (BeaconSettings::default(), Some(e)),
        };

        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db_path) = &self.db_path {
            settings.store.path = db_path.to_string_lossy().into_owned();
        }
        if self.no_monitor {
            settings.monitor.enabled = false;
        }
        (settings, load_error)
    }
}

fn open_inventory(path: &Path) -> Result<MachineRepo> {
    let db = Database::open(path)
        .with_context(|| format!("Failed to open inventory database: {}", path.display()))?;
    Ok(MachineRepo::new(db))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for ctrl-c")?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Settings first: the log level comes from them.
    let (settings, load_error) = args.resolve_settings();
    let _telemetry = init_telemetry(&TelemetryConfig::from_level_name(
        &settings.logging.level,
        settings.logging.json,
    ));
    if let Some(e) = load_error {
        tracing::warn!(error = %e, "failed to load settings, using defaults");
    }

    let metrics = match beacon_server::metrics::install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    let repo = open_inventory(Path::new(&settings.store.path))?;
    tracing::info!(path = %settings.store.path, "inventory database opened");

    let config = ServerConfig::from(&settings);
    let shutdown = Arc::new(ShutdownCoordinator::new());
    let (hub, hub_task) = Hub::spawn(shutdown.token());

    shutdown.track("hub", hub_task);
    if config.monitor_enabled {
        let source: Arc<dyn StatusSource> = Arc::new(repo);
        let publisher = StatusPublisher::new(source, hub.clone(), config.monitor_interval());
        shutdown.track("publisher", publisher.spawn(shutdown.token()));
    } else {
        tracing::info!("status publisher disabled");
    }

    let mut server = BeaconServer::new(config, hub, shutdown.clone());
    if let Some(handle) = metrics {
        server = server.with_metrics(handle);
    }
    let (addr, serve_task) = server.listen().await.context("Failed to bind server")?;
    shutdown.track("server", serve_task);

    tracing::info!("beacon listening on http://{addr}");

    shutdown_signal().await?;

    tracing::info!("shutting down");
    let report = shutdown.graceful_shutdown().await;
    if report.is_clean() {
        tracing::info!("shutdown complete");
    }
    Ok(())
}

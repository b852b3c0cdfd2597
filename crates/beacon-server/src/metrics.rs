//! Prometheus metrics recorder and `/metrics` rendering.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections removed from the hub (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Current hub members (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Endpoints dropped because their queue was full or closed (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Registrations that replaced a live endpoint with the same id (counter).
pub const WS_SUPERSEDED_TOTAL: &str = "ws_superseded_total";
/// Upgrade requests refused at the connection cap (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Status snapshots broadcast (counter).
pub const STATUS_PUBLISH_TOTAL: &str = "status_publish_total";
/// Publisher ticks skipped (counter, labels: kind).
pub const STATUS_PUBLISH_FAILURES_TOTAL: &str = "status_publish_failures_total";
/// Agent heartbeats accepted (counter).
pub const CLIENT_HEARTBEATS_TOTAL: &str = "client_heartbeats_total";

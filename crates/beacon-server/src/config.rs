//! Server configuration.

use std::time::Duration;

use beacon_settings::BeaconSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the beacon server and its connection endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Largest inbound WebSocket frame, in bytes.
    pub max_message_size: usize,
    /// Capacity of each endpoint's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Keepalive ping interval in seconds (`0` disables pings).
    pub ping_interval_secs: u64,
    /// How long to wait for the close frame to flush once reading stops.
    pub close_grace_ms: u64,
    /// Maximum concurrent WebSocket connections (`0` = unlimited).
    pub max_connections: usize,
    /// Whether the status publisher runs.
    pub monitor_enabled: bool,
    /// Status publish interval in seconds.
    pub monitor_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            max_message_size: 512,
            outbound_queue_capacity: 256,
            ping_interval_secs: 30,
            close_grace_ms: 2_000,
            max_connections: 0,
            monitor_enabled: true,
            monitor_interval_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Keepalive interval, or `None` when pings are disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    /// Grace period for the outbound pump after the inbound pump ends.
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Publisher tick interval.
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl From<&BeaconSettings> for ServerConfig {
    fn from(settings: &BeaconSettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            max_message_size: server.max_message_size,
            outbound_queue_capacity: server.outbound_queue_capacity,
            ping_interval_secs: server.ping_interval_secs,
            close_grace_ms: server.close_grace_ms,
            max_connections: server.max_connections,
            monitor_enabled: settings.monitor.enabled,
            monitor_interval_secs: settings.monitor.interval_secs,
        }
    }
}

//! Settings types and their compiled defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// HTTP / WebSocket server.
    pub server: ServerSettings,
    /// Periodic status publisher.
    pub monitor: MonitorSettings,
    /// Machine inventory database.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl BeaconSettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueueCapacity must be at least 1".into(),
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be at least 1".into(),
            ));
        }
        if self.monitor.interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "monitor.intervalSecs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Largest inbound WebSocket frame accepted, in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity.
    pub outbound_queue_capacity: usize,
    /// Seconds between keepalive pings (`0` disables).
    pub ping_interval_secs: u64,
    /// How long a connection waits for its close frame to flush after the
    /// read side ends, in milliseconds.
    pub close_grace_ms: u64,
    /// Upgrade requests beyond this many members are refused (`0` = unlimited).
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_size: 512,
            outbound_queue_capacity: 256,
            ping_interval_secs: 30,
            close_grace_ms: 2_000,
            max_connections: 0,
        }
    }
}

/// Status publisher settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    /// Whether the publisher runs at all.
    pub enabled: bool,
    /// Seconds between snapshots.
    pub interval_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 5,
        }
    }
}

/// Machine inventory database settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Path to the SQLite file.
    pub path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: crate::loader::beacon_dir()
                .join("beacon.db")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`RUST_LOG` takes precedence).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

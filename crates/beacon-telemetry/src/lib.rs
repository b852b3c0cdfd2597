//! Tracing subscriber setup.
//!
//! One call at startup installs a global subscriber: an `EnvFilter` (from
//! `RUST_LOG` when set, otherwise the configured level plus per-module
//! overrides) feeding a `fmt` layer that writes JSON lines or human-readable
//! output to stdout.

#![deny(unsafe_code)]

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"beacon_server::hub"` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from a level name such as `"debug"`. Unknown names fall back to INFO.
    pub fn from_level_name(level: &str, json: bool) -> Self {
        Self {
            log_level: Level::from_str(level).unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json,
        }
    }

    /// Add a per-module override.
    #[must_use]
    pub fn with_module_level(mut self, module: impl Into<String>, level: Level) -> Self {
        self.module_levels.push((module.into(), level));
        self
    }

    /// Filter directives derived from the config alone (ignores `RUST_LOG`).
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push(',');
            filter.push_str(module);
            filter.push('=');
            filter.push_str(&level.to_string().to_lowercase());
        }
        filter
    }
}

/// Handle returned by [`init_telemetry`].
#[derive(Debug)]
pub struct TelemetryGuard {
    directives: String,
    installed: bool,
}

impl TelemetryGuard {
    /// The filter directives in effect.
    pub fn directives(&self) -> &str {
        &self.directives
    }

    /// Whether this call installed the global subscriber. `false` when one
    /// was already set (common in tests).
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Initialize the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let (env_filter, directives) = match std::env::var("RUST_LOG") {
        Ok(from_env) if !from_env.is_empty() => match EnvFilter::try_new(&from_env) {
            Ok(filter) => (filter, from_env),
            Err(_) => {
                let d = config.filter_directives();
                (EnvFilter::new(&d), d)
            }
        },
        _ => {
            let d = config.filter_directives();
            (EnvFilter::new(&d), d)
        }
    };

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(fmt_layer)
        .try_init()
        .is_ok();

    TelemetryGuard {
        directives,
        installed,
    }
}

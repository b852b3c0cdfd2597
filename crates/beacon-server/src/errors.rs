//! Server error types.

use thiserror::Error;

/// Failures reported by [`HubHandle`](crate::hub::HubHandle) calls.
#[derive(Debug, Error)]
pub enum HubError {
    /// The hub loop has stopped; no further commands are accepted.
    #[error("hub is not running")]
    Closed,
    /// The envelope could not be serialized; nothing was sent.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failures starting or running the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Other I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

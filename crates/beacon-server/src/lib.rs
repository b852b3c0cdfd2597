//! # beacon-server
//!
//! The connection hub and everything around it:
//!
//! - [`hub`]: the single actor that owns client membership and performs every
//!   broadcast and targeted send
//! - [`endpoint`]: per-connection inbound/outbound pumps
//! - [`publisher`]: timer-driven status snapshot broadcaster
//! - [`server`]: axum router (`/ws/{user_id}`, `/health`, `/metrics`, `/api/v1/heartbeats`)

#![deny(unsafe_code)]

pub mod config;
pub mod endpoint;
pub mod errors;
pub mod health;
pub mod heartbeat;
pub mod hub;
pub mod metrics;
pub mod publisher;
pub mod server;
pub mod shutdown;

pub use config::ServerConfig;
pub use errors::{HubError, ServerError};
pub use hub::{Hub, HubHandle, Registration};
pub use publisher::{StatusPublisher, TickOutcome};
pub use server::BeaconServer;
pub use shutdown::{ShutdownCoordinator, ShutdownReport};

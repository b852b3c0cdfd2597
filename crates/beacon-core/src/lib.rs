//! # beacon-core
//!
//! Shared vocabulary for the beacon crates.
//!
//! - **Client IDs**: [`ClientId`], the externally supplied registry key
//! - **Envelopes**: [`Envelope`], the JSON message unit pushed to WebSocket clients
//! - **Machine records**: [`MachineRecord`] and [`StatusSnapshot`]
//! - **Status sources**: the [`StatusSource`] trait the publisher polls

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod machine;
pub mod source;

pub use envelope::{Envelope, EnvelopeType};
pub use errors::SourceError;
pub use ids::ClientId;
pub use machine::{MachineRecord, MachineStatus, StatusSnapshot};
pub use source::StatusSource;

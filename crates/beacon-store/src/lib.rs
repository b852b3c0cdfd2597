//! # beacon-store
//!
//! SQLite-backed machine inventory. [`MachineRepo`] is the production
//! [`beacon_core::StatusSource`]: every fetch re-reads the `machines` table.

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod machines;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use machines::{MachineRepo, NewMachine};

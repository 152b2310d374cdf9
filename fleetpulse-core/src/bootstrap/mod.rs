//! Bootstrap helpers for the `fleetpulse` binary
//!
//! - Configuration loading
//! - Database pool creation
//! - Telemetry store selection

pub mod config;
pub mod database;

pub use config::load_config;
pub use database::{init_database, init_store};

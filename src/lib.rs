//! Sync Status Bridge Library
//!
//! Mirrors msyncd's `syncStatus` signals into an observable collection of
//! transfers and forwards start/cancel requests back to the daemon.

pub mod accounts;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod dbus;
pub mod dispatcher;
pub mod error;
pub mod gui;
pub mod profile;
pub mod registry;
pub mod status;
pub mod transfer;
pub mod transport;
pub mod web;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use dispatcher::Command;
pub use error::{BridgeError, TransportError};
pub use registry::{ModelEvent, TransferRegistry};
pub use status::{Detail, Phase, ProgressTracker, StatusCode, StatusNotification};
pub use transfer::{Category, LaunchTarget, Transfer, TransferId, TransferState};

//! Error types for sync-status-bridge

use thiserror::Error;

use crate::transfer::TransferState;

/// Failures of the bus transport itself.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    /// The bridge's cancellation token fired while the operation was in flight.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Unexpected reply shape, expected {expected}")]
    UnexpectedReply { expected: &'static str },

    #[error("D-Bus error: {0}")]
    Zbus(#[from] zbus::Error),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

/// Errors surfaced by the bridge to its UI layer.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Not connected to the bus")]
    NotConnected,

    #[error("Connection failure: {0}")]
    ConnectionFailure(#[source] TransportError),

    #[error("Remote call {method} failed: {source}")]
    RemoteCall {
        method: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("Daemon refused to start sync for profile {0}")]
    StartRejected(String),

    #[error("{0} is not supported by the sync daemon")]
    Unsupported(&'static str),

    #[error("Unknown transfer: {0}")]
    UnknownEntity(String),

    #[error("Transfer cannot be started while {0}")]
    NotStartable(TransferState),

    #[error("Transfer {0} has no application to open")]
    NoLaunchTarget(String),

    #[error("Failed to launch {url}: {message}")]
    Launch { url: String, message: String },

    #[error("Bridge is no longer running")]
    BridgeStopped,
}

/// Malformed profile description.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Malformed profile XML: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

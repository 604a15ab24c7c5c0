//! Bus Transport Seam
//!
//! The bridge only needs four bus primitives: connect, subscribe to one
//! signal, unsubscribe, and call a method taking a single string. They are
//! expressed as traits so the event loop can be driven without a session bus.

use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::status::RawStatus;

/// msyncd's well-known bus name
pub const DAEMON_SERVICE: &str = "com.meego.msyncd";
/// Object path of the synchronizer
pub const DAEMON_PATH: &str = "/synchronizer";
/// Interface carrying the sync methods and signals
pub const DAEMON_INTERFACE: &str = "com.meego.msyncd";

pub const SYNC_STATUS_SIGNAL: &str = "syncStatus";
pub const START_SYNC: &str = "startSync";
pub const ABORT_SYNC: &str = "abortSync";
pub const SYNC_PROFILE: &str = "syncProfile";

/// Where the sync daemon lives on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonAddress {
    pub service: String,
    pub path: String,
    pub interface: String,
}

impl Default for DaemonAddress {
    fn default() -> Self {
        Self {
            service: DAEMON_SERVICE.to_string(),
            path: DAEMON_PATH.to_string(),
            interface: DAEMON_INTERFACE.to_string(),
        }
    }
}

/// Reply signature a method call is expected to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// `()`
    Unit,
    /// `(b)`
    Bool,
    /// `(s)`
    Text,
}

impl ReplyShape {
    pub fn signature(self) -> &'static str {
        match self {
            ReplyShape::Unit => "()",
            ReplyShape::Bool => "(b)",
            ReplyShape::Text => "(s)",
        }
    }
}

/// Decoded method reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallReply {
    Unit,
    Bool(bool),
    Text(String),
}

impl CallReply {
    pub fn into_bool(self) -> Result<bool, TransportError> {
        match self {
            CallReply::Bool(value) => Ok(value),
            _ => Err(TransportError::UnexpectedReply {
                expected: ReplyShape::Bool.signature(),
            }),
        }
    }

    pub fn into_text(self) -> Result<String, TransportError> {
        match self {
            CallReply::Text(value) => Ok(value),
            _ => Err(TransportError::UnexpectedReply {
                expected: ReplyShape::Text.signature(),
            }),
        }
    }
}

/// An installed signal match. Dropping it removes the match.
pub struct Subscription {
    stream: BoxStream<'static, RawStatus>,
}

impl Subscription {
    pub fn new(stream: BoxStream<'static, RawStatus>) -> Self {
        Self { stream }
    }

    /// Next signal, `None` once the bus side went away.
    pub async fn next(&mut self) -> Option<RawStatus> {
        self.stream.next().await
    }

    pub fn unsubscribe(self) {
        drop(self.stream);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Acquires bus connections.
#[allow(async_fn_in_trait)]
pub trait Transport: Clone + 'static {
    type Handle: BusHandle;

    async fn connect(&self) -> Result<Self::Handle, TransportError>;
}

/// A live bus connection.
#[allow(async_fn_in_trait)]
pub trait BusHandle: Clone + 'static {
    /// Whether both values refer to the same underlying connection.
    fn same_as(&self, other: &Self) -> bool;

    async fn subscribe(
        &self,
        daemon: &DaemonAddress,
        signal: &str,
    ) -> Result<Subscription, TransportError>;

    async fn call(
        &self,
        daemon: &DaemonAddress,
        method: &str,
        arg: &str,
        reply: ReplyShape,
    ) -> Result<CallReply, TransportError>;
}

/// Run `operation` unless `cancel` fires first.
pub async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        result = operation => result,
    }
}

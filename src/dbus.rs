//! D-Bus Transport for msyncd
//!
//! Service: com.meego.msyncd
//! Object Path: /synchronizer
//!
//! Listens to `syncStatus(s i s i)` and calls `startSync`, `abortSync` and
//! `syncProfile` through zbus.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zbus::message::Type as MessageType;
use zbus::{Connection, MatchRule, MessageStream};

use crate::error::TransportError;
use crate::status::RawStatus;
use crate::transport::{BusHandle, CallReply, DaemonAddress, ReplyShape, Subscription, Transport};

/// Signals buffered before the bridge drains them
const SIGNAL_QUEUE: usize = 64;

/// Which message bus msyncd is registered on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

/// zbus-backed transport
#[derive(Debug, Clone, Default)]
pub struct ZbusTransport {
    kind: BusKind,
}

impl ZbusTransport {
    pub fn new(kind: BusKind) -> Self {
        Self { kind }
    }
}

impl Transport for ZbusTransport {
    type Handle = ZbusHandle;

    async fn connect(&self) -> Result<ZbusHandle, TransportError> {
        let connection = match self.kind {
            BusKind::Session => Connection::session().await,
            BusKind::System => Connection::system().await,
        }
        .map_err(|e| TransportError::Unavailable(e.to_string()))?;

        debug!(
            "Connected to {:?} bus as {:?}",
            self.kind,
            connection.unique_name().map(|name| name.as_str())
        );
        Ok(ZbusHandle { connection })
    }
}

/// A zbus connection
#[derive(Debug, Clone)]
pub struct ZbusHandle {
    connection: Connection,
}

impl ZbusHandle {
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl BusHandle for ZbusHandle {
    fn same_as(&self, other: &Self) -> bool {
        match (self.connection.unique_name(), other.connection.unique_name()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    async fn subscribe(
        &self,
        daemon: &DaemonAddress,
        signal: &str,
    ) -> Result<Subscription, TransportError> {
        let rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .sender(daemon.service.as_str())?
            .interface(daemon.interface.as_str())?
            .member(signal)?
            .path(daemon.path.as_str())?
            .build();

        let stream =
            MessageStream::for_match_rule(rule, &self.connection, Some(SIGNAL_QUEUE)).await?;
        let stream = stream.filter_map(|message| async move {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!("Error on syncStatus stream: {}", e);
                    return None;
                }
            };
            match message.body().deserialize::<(String, i32, String, i32)>() {
                Ok((profile_id, status, message, detail)) => Some(RawStatus {
                    profile_id,
                    status,
                    message,
                    detail,
                }),
                Err(e) => {
                    warn!("Malformed syncStatus signal: {}", e);
                    None
                }
            }
        });

        Ok(Subscription::new(stream.boxed()))
    }

    async fn call(
        &self,
        daemon: &DaemonAddress,
        method: &str,
        arg: &str,
        reply: ReplyShape,
    ) -> Result<CallReply, TransportError> {
        let message = self
            .connection
            .call_method(
                Some(daemon.service.as_str()),
                daemon.path.as_str(),
                Some(daemon.interface.as_str()),
                method,
                &(arg,),
            )
            .await
            .map_err(|e| match e {
                zbus::Error::MethodError(name, detail, _) => {
                    TransportError::Remote(format!("{}: {}", name, detail.unwrap_or_default()))
                }
                other => TransportError::Zbus(other),
            })?;

        let body = message.body();
        let unexpected = |_| TransportError::UnexpectedReply {
            expected: reply.signature(),
        };
        match reply {
            ReplyShape::Unit => Ok(CallReply::Unit),
            ReplyShape::Bool => body
                .deserialize::<bool>()
                .map(CallReply::Bool)
                .map_err(unexpected),
            ReplyShape::Text => body
                .deserialize::<String>()
                .map(CallReply::Text)
                .map_err(unexpected),
        }
    }
}

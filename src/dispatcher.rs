//! UI Commands
//!
//! Requests coming from the indicator (window, web API) are turned into
//! msyncd method calls. Transfer identities are mapped back to profile ids
//! here; the daemon never sees a `TransferId`.

use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::error::{BridgeError, Result};
use crate::transfer::{Transfer, TransferId};
use crate::transport::{cancellable, BusHandle, ReplyShape, Transport, ABORT_SYNC, START_SYNC};

/// Reply channel carried by a command
pub type Reply<T> = oneshot::Sender<Result<T>>;

/// A request from the UI layer
#[derive(Debug)]
pub enum Command {
    Open { id: TransferId, reply: Reply<()> },
    Start { id: TransferId, reply: Reply<()> },
    Cancel { id: TransferId, reply: Reply<()> },
    Pause { id: TransferId, reply: Reply<()> },
    Resume { id: TransferId, reply: Reply<()> },
    List { reply: Reply<Vec<Transfer>> },
    Connected { reply: Reply<bool> },
    Connect { reply: Reply<()> },
    Disconnect { reply: Reply<()> },
}

impl Command {
    /// Build a command and the receiver for its reply.
    pub fn with_reply<T, F>(build: F) -> (Self, oneshot::Receiver<Result<T>>)
    where
        F: FnOnce(Reply<T>) -> Self,
    {
        let (tx, rx) = oneshot::channel();
        (build(tx), rx)
    }
}

impl<T: Transport> Bridge<T> {
    /// Launch the application associated with a transfer.
    pub fn open(&self, id: &TransferId) -> Result<()> {
        let transfer = self.registry.get(id)?;
        let target = transfer
            .launch_target
            .as_ref()
            .ok_or_else(|| BridgeError::NoLaunchTarget(id.to_string()))?;
        let url = target.url();
        info!("Open {} with {}", transfer.profile_id, url);
        self.launcher.launch(&url)
    }

    /// Ask the daemon to run the transfer's profile again.
    pub async fn start(&mut self, id: &TransferId) -> Result<()> {
        let handle = self.connection.handle()?;
        let transfer = self.registry.get(id)?;
        if !transfer.can_start() {
            return Err(BridgeError::NotStartable(transfer.state));
        }
        let profile_id = transfer.profile_id.clone();

        info!("Start sync for profile {}", profile_id);
        let accepted = cancellable(
            &self.cancel,
            handle.call(&self.daemon, START_SYNC, &profile_id, ReplyShape::Bool),
        )
        .await
        .and_then(|reply| reply.into_bool())
        .map_err(|source| {
            warn!("Fail to start sync: {}", source);
            BridgeError::RemoteCall {
                method: START_SYNC,
                source,
            }
        })?;

        if !accepted {
            warn!("Fail to start sync for profile {}", profile_id);
            return Err(BridgeError::StartRejected(profile_id));
        }

        self.registry.requeue(id)?;
        Ok(())
    }

    /// Ask the daemon to abort the transfer's profile.
    pub async fn cancel(&mut self, id: &TransferId) -> Result<()> {
        let handle = self.connection.handle()?;
        let profile_id = self.registry.profile_of(id)?;

        info!("Abort sync for profile {}", profile_id);
        cancellable(
            &self.cancel,
            handle.call(&self.daemon, ABORT_SYNC, profile_id, ReplyShape::Unit),
        )
        .await
        .map(|_| ())
        .map_err(|source| {
            warn!("Fail to abort sync for profile {}: {}", profile_id, source);
            BridgeError::RemoteCall {
                method: ABORT_SYNC,
                source,
            }
        })
    }

    pub fn pause(&self, _id: &TransferId) -> Result<()> {
        warn!("Sync daemon does not support pause");
        Err(BridgeError::Unsupported("pause"))
    }

    pub fn resume(&self, _id: &TransferId) -> Result<()> {
        warn!("Sync daemon does not support resume");
        Err(BridgeError::Unsupported("resume"))
    }

    pub(crate) async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { id, reply } => {
                let result = self.open(&id);
                if let Err(e) = &result {
                    warn!("Open {} failed: {}", id, e);
                }
                let _ = reply.send(result);
            }
            Command::Start { id, reply } => {
                let result = self.start(&id).await;
                let _ = reply.send(result);
            }
            Command::Cancel { id, reply } => {
                let result = self.cancel(&id).await;
                let _ = reply.send(result);
            }
            Command::Pause { id, reply } => {
                let _ = reply.send(self.pause(&id));
            }
            Command::Resume { id, reply } => {
                let _ = reply.send(self.resume(&id));
            }
            Command::List { reply } => {
                let _ = reply.send(Ok(self.registry.snapshot()));
            }
            Command::Connected { reply } => {
                let _ = reply.send(Ok(self.connected()));
            }
            Command::Connect { reply } => {
                self.connect();
                let _ = reply.send(Ok(()));
            }
            Command::Disconnect { reply } => {
                self.disconnect();
                let _ = reply.send(Ok(()));
            }
        }
    }
}

//! Status Bridge
//!
//! Glues the bus connection, the transfer registry and the status decoder
//! together. Everything runs on one task: bus events and UI commands are
//! handled one at a time, and remote calls are awaited inline.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::accounts::{describe, AccountDirectory, Launcher};
use crate::connection::{BusEvent, ConnectionManager};
use crate::dispatcher::Command;
use crate::error::{BridgeError, TransportError};
use crate::profile;
use crate::registry::{ModelEvent, TransferRegistry};
use crate::status::{RawStatus, StatusNotification};
use crate::transfer::{Transfer, TransferMetadata};
use crate::transport::{cancellable, BusHandle, DaemonAddress, Transport, SYNC_STATUS_SIGNAL};

pub struct Bridge<T: Transport> {
    transport: T,
    pub(crate) daemon: DaemonAddress,
    pub(crate) connection: ConnectionManager<T::Handle>,
    pub(crate) registry: TransferRegistry,
    accounts: Box<dyn AccountDirectory>,
    pub(crate) launcher: Box<dyn Launcher>,
    pub(crate) cancel: CancellationToken,
}

impl<T: Transport> Bridge<T> {
    pub fn new(
        transport: T,
        daemon: DaemonAddress,
        accounts: Box<dyn AccountDirectory>,
        launcher: Box<dyn Launcher>,
    ) -> Self {
        Self {
            transport,
            daemon,
            connection: ConnectionManager::new(),
            registry: TransferRegistry::new(),
            accounts,
            launcher,
            cancel: CancellationToken::new(),
        }
    }

    pub fn connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// Register an observer of added/changed/removed events.
    pub fn observe<F>(&mut self, observer: F)
    where
        F: Fn(&ModelEvent) + 'static,
    {
        self.registry.observe(observer);
    }

    /// Token governing every in-flight async operation of this bridge.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Begin acquiring the bus. Completion is delivered as a bus event.
    pub fn connect(&mut self) {
        let transport = self.transport.clone();
        let cancel = self.cancel.clone();
        if self
            .connection
            .begin(async move { cancellable(&cancel, transport.connect()).await })
        {
            debug!("Acquiring bus connection");
        } else {
            debug!("Connect ignored, already connected or connecting");
        }
    }

    /// Drop any pending acquisition, remove the subscription, retire every
    /// transfer and release the bus.
    pub fn disconnect(&mut self) {
        if self.connection.abandon() {
            debug!("Abandoned in-flight bus acquisition");
        }
        if self.connection.detach() {
            let retired = self.registry.clear();
            info!("Disconnected from bus, retired {} transfers", retired);
        }
    }

    /// Cancel in-flight work and disconnect. The bridge cannot reconnect afterwards.
    pub fn teardown(&mut self) {
        self.cancel.cancel();
        self.disconnect();
    }

    /// Wait for and handle one bus event. Returns `false` when idle.
    pub async fn dispatch_next(&mut self) -> bool {
        match self.connection.next_event().await {
            Some(event) => {
                self.handle_bus_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Serve bus events and UI commands until shutdown or all senders are gone.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let shutdown = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Bridge shutting down");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("Command channel closed");
                        break;
                    }
                },
                Some(event) = self.connection.next_event() => {
                    self.handle_bus_event(event).await;
                }
            }
        }
        self.teardown();
    }

    async fn handle_bus_event(&mut self, event: BusEvent<T::Handle>) {
        match event {
            BusEvent::Ready(result) => self.on_bus_ready(result).await,
            BusEvent::Status(raw) => self.on_sync_status(raw).await,
            BusEvent::Closed => {
                warn!("Lost connection to the sync daemon's bus");
                self.disconnect();
            }
        }
    }

    async fn on_bus_ready(&mut self, result: Result<T::Handle, TransportError>) {
        let handle = match result {
            Ok(handle) => handle,
            Err(TransportError::Cancelled) => {
                debug!("Bus acquisition cancelled");
                return;
            }
            Err(e) => {
                warn!("Could not get bus: {}", e);
                return;
            }
        };

        if self.connection.is_attached_to(&handle) {
            debug!("Bus handle unchanged");
            return;
        }
        self.disconnect();

        let subscription = match cancellable(
            &self.cancel,
            handle.subscribe(&self.daemon, SYNC_STATUS_SIGNAL),
        )
        .await
        {
            Ok(subscription) => subscription,
            Err(e) if e.is_cancelled() => {
                debug!("Subscription cancelled");
                return;
            }
            Err(e) => {
                warn!("{}", BridgeError::ConnectionFailure(e));
                return;
            }
        };

        self.connection.attach(handle, subscription);
        info!(
            "Watching {} on {} {}",
            SYNC_STATUS_SIGNAL, self.daemon.service, self.daemon.path
        );
    }

    async fn on_sync_status(&mut self, raw: RawStatus) {
        debug!(
            "Profile {} status {} message {:?} details {}",
            raw.profile_id, raw.status, raw.message, raw.detail
        );

        let notification = match StatusNotification::try_from(raw) {
            Ok(notification) => notification,
            Err(code) => {
                warn!("Ignoring syncStatus with unexpected status {}", code);
                return;
            }
        };

        let metadata = if self.registry.contains_profile(&notification.profile_id) {
            None
        } else {
            Some(self.resolve_metadata(&notification.profile_id).await)
        };

        let profile_id = notification.profile_id.clone();
        let (transfer, is_new) = self.registry.upsert(&notification, move || {
            Transfer::new(profile_id, metadata.unwrap_or_default())
        });

        if is_new {
            info!("Add new profile {} \"{}\"", transfer.profile_id, transfer.title);
        }
    }

    async fn resolve_metadata(&self, profile_id: &str) -> TransferMetadata {
        let fields = match self.connection.handle() {
            Ok(handle) => profile::resolve(handle, &self.daemon, profile_id, &self.cancel).await,
            Err(_) => Default::default(),
        };
        describe(profile_id, &fields, self.accounts.as_ref())
    }
}

impl<T: Transport> Drop for Bridge<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}

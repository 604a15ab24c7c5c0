//! Bus Connection Lifecycle
//!
//! Holds the one bus handle the bridge uses, the in-flight acquisition of a
//! new one, and the single `syncStatus` subscription installed on it.

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use std::future::Future;

use crate::error::{BridgeError, TransportError};
use crate::status::RawStatus;
use crate::transport::{BusHandle, Subscription};

type PendingConnect<H> = LocalBoxFuture<'static, Result<H, TransportError>>;

/// Something the bus side produced
#[derive(Debug)]
pub enum BusEvent<H> {
    /// Acquisition finished
    Ready(Result<H, TransportError>),
    /// A `syncStatus` signal arrived
    Status(RawStatus),
    /// The subscription's stream ended
    Closed,
}

pub struct ConnectionManager<H: BusHandle> {
    handle: Option<H>,
    subscription: Option<Subscription>,
    pending: Option<PendingConnect<H>>,
}

impl<H: BusHandle> Default for ConnectionManager<H> {
    fn default() -> Self {
        Self {
            handle: None,
            subscription: None,
            pending: None,
        }
    }
}

impl<H: BusHandle> ConnectionManager<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn is_connecting(&self) -> bool {
        self.pending.is_some()
    }

    /// Current handle, borrowed for the duration of one call.
    pub fn handle(&self) -> Result<&H, BridgeError> {
        self.handle.as_ref().ok_or(BridgeError::NotConnected)
    }

    pub fn is_attached_to(&self, handle: &H) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|current| current.same_as(handle))
    }

    /// Start acquiring a connection. Ignored while connected or connecting.
    pub fn begin<F>(&mut self, acquire: F) -> bool
    where
        F: Future<Output = Result<H, TransportError>> + 'static,
    {
        if self.is_connected() || self.is_connecting() {
            return false;
        }
        self.pending = Some(acquire.boxed_local());
        true
    }

    /// Drop any in-flight acquisition.
    pub fn abandon(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Install a handle with its subscription, replacing nothing.
    pub fn attach(&mut self, handle: H, subscription: Subscription) {
        debug_assert!(self.handle.is_none(), "attach while already connected");
        self.handle = Some(handle);
        self.subscription = Some(subscription);
    }

    /// Remove the subscription and release the handle.
    pub fn detach(&mut self) -> bool {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.handle.take().is_some()
    }

    /// Wait for the next bus-side event. `None` when nothing can happen.
    pub async fn next_event(&mut self) -> Option<BusEvent<H>> {
        if let Some(pending) = self.pending.as_mut() {
            let result = pending.await;
            self.pending = None;
            return Some(BusEvent::Ready(result));
        }

        let subscription = self.subscription.as_mut()?;
        Some(match subscription.next().await {
            Some(status) => BusEvent::Status(status),
            None => BusEvent::Closed,
        })
    }
}

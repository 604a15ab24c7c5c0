//! Transfer Registry
//!
//! Owns every live transfer, keyed by the daemon's profile id, and tells
//! observers about each mutation before returning to the caller.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::status::{StatusCode, StatusNotification};
use crate::transfer::{Transfer, TransferId, TransferState};

/// Change notification for the observable transfer collection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelEvent {
    Added { transfer: Transfer },
    Changed { transfer: Transfer },
    Removed { id: TransferId, profile_id: String },
}

impl ModelEvent {
    pub fn id(&self) -> TransferId {
        match self {
            ModelEvent::Added { transfer } | ModelEvent::Changed { transfer } => transfer.id,
            ModelEvent::Removed { id, .. } => *id,
        }
    }
}

type Observer = Box<dyn Fn(&ModelEvent)>;

/// Live transfers of the current connection epoch
#[derive(Default)]
pub struct TransferRegistry {
    by_profile: HashMap<String, Transfer>,
    profiles: HashMap<TransferId, String>,
    observers: Vec<Observer>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every added/changed/removed event.
    pub fn observe<F>(&mut self, observer: F)
    where
        F: Fn(&ModelEvent) + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    pub fn len(&self) -> usize {
        self.by_profile.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_profile.is_empty()
    }

    pub fn contains_profile(&self, profile_id: &str) -> bool {
        self.by_profile.contains_key(profile_id)
    }

    pub fn get(&self, id: &TransferId) -> Result<&Transfer> {
        self.profiles
            .get(id)
            .and_then(|profile_id| self.by_profile.get(profile_id))
            .ok_or_else(|| BridgeError::UnknownEntity(id.to_string()))
    }

    pub fn get_by_profile(&self, profile_id: &str) -> Result<&Transfer> {
        self.by_profile
            .get(profile_id)
            .ok_or_else(|| BridgeError::UnknownEntity(profile_id.to_string()))
    }

    /// Daemon profile id behind a UI identity.
    pub fn profile_of(&self, id: &TransferId) -> Result<&str> {
        self.profiles
            .get(id)
            .map(String::as_str)
            .ok_or_else(|| BridgeError::UnknownEntity(id.to_string()))
    }

    /// All transfers, oldest update first.
    pub fn snapshot(&self) -> Vec<Transfer> {
        let mut transfers: Vec<Transfer> = self.by_profile.values().cloned().collect();
        transfers.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.title.cmp(&b.title)));
        transfers
    }

    /// Apply a notification, creating the transfer with `create` when unseen.
    ///
    /// Returns the transfer as it stands after the update and whether it was
    /// created. A canceled transfer is removed before this returns.
    pub fn upsert<F>(&mut self, notification: &StatusNotification, create: F) -> (Transfer, bool)
    where
        F: FnOnce() -> Transfer,
    {
        let profile_id = notification.profile_id.as_str();
        let is_new = !self.by_profile.contains_key(profile_id);

        let transfer = self.by_profile.entry(profile_id.to_string()).or_insert_with(|| {
            let transfer = create();
            debug!("Add new profile {} as {}", profile_id, transfer.id);
            transfer
        });
        if is_new {
            self.profiles.insert(transfer.id, profile_id.to_string());
        }

        transfer.apply(notification);
        let transfer = transfer.clone();

        if is_new {
            self.emit(&ModelEvent::Added {
                transfer: transfer.clone(),
            });
        } else {
            self.emit(&ModelEvent::Changed {
                transfer: transfer.clone(),
            });
        }

        if transfer.state == TransferState::Canceled {
            self.remove(profile_id);
        }

        (transfer, is_new)
    }

    /// Move a transfer back to QUEUED after the daemon accepted a new run.
    pub fn requeue(&mut self, id: &TransferId) -> Result<Transfer> {
        let profile_id = self.profile_of(id)?.to_string();
        let transfer = self
            .by_profile
            .get_mut(&profile_id)
            .ok_or_else(|| BridgeError::UnknownEntity(id.to_string()))?;

        transfer.apply(&StatusNotification::new(profile_id, StatusCode::Queued, "", 0));
        let transfer = transfer.clone();
        self.emit(&ModelEvent::Changed {
            transfer: transfer.clone(),
        });
        Ok(transfer)
    }

    /// Forget a profile. Absent profiles are ignored.
    pub fn remove(&mut self, profile_id: &str) -> Option<Transfer> {
        let transfer = self.by_profile.remove(profile_id)?;
        self.profiles.remove(&transfer.id);
        debug!("Remove profile {} ({})", profile_id, transfer.id);
        self.emit(&ModelEvent::Removed {
            id: transfer.id,
            profile_id: profile_id.to_string(),
        });
        Some(transfer)
    }

    /// Retire every transfer, e.g. when the connection epoch ends.
    pub fn clear(&mut self) -> usize {
        let profile_ids: Vec<String> = self.by_profile.keys().cloned().collect();
        for profile_id in &profile_ids {
            self.remove(profile_id);
        }
        profile_ids.len()
    }

    fn emit(&self, event: &ModelEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }
}

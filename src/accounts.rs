//! Accounts, Applications and Launching
//!
//! Online accounts and the applications registered for their services are
//! owned by the desktop, not by msyncd. The bridge only needs a display name
//! per account, an application per service, and a way to open a URL.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::profile::ProfileFields;
use crate::transfer::{LaunchTarget, TransferMetadata};

/// Application that handles a sync service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    /// Application name, also its URL scheme when there is no desktop file
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub desktop_file: Option<PathBuf>,
}

impl ApplicationInfo {
    pub fn launch_target(&self) -> LaunchTarget {
        let file_name = self
            .desktop_file
            .as_deref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned());

        match file_name {
            Some(file) => LaunchTarget::DesktopFile(file),
            None => LaunchTarget::UrlScheme(self.name.clone()),
        }
    }
}

/// Lookup of accounts and service applications
pub trait AccountDirectory {
    fn display_name(&self, account_id: u32) -> Option<String>;

    /// Applications registered for a service, preferred first.
    fn applications(&self, service: &str) -> Vec<ApplicationInfo>;

    fn has_service(&self, service: &str) -> bool;
}

/// Account entry from the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: u32,
    pub display_name: String,
}

/// Service entry from the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    #[serde(default)]
    pub applications: Vec<ApplicationInfo>,
}

/// Account directory backed by static configuration
#[derive(Debug, Clone, Default)]
pub struct ConfiguredAccounts {
    accounts: HashMap<u32, String>,
    services: HashMap<String, Vec<ApplicationInfo>>,
}

impl ConfiguredAccounts {
    pub fn new(accounts: &[AccountEntry], services: &[ServiceEntry]) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|a| (a.id, a.display_name.clone()))
                .collect(),
            services: services
                .iter()
                .map(|s| (s.name.clone(), s.applications.clone()))
                .collect(),
        }
    }
}

impl AccountDirectory for ConfiguredAccounts {
    fn display_name(&self, account_id: u32) -> Option<String> {
        self.accounts.get(&account_id).cloned()
    }

    fn applications(&self, service: &str) -> Vec<ApplicationInfo> {
        self.services.get(service).cloned().unwrap_or_default()
    }

    fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }
}

/// Derive the write-once display fields of a new transfer.
pub fn describe(
    profile_id: &str,
    fields: &ProfileFields,
    accounts: &dyn AccountDirectory,
) -> TransferMetadata {
    let category = fields.category();
    let mut title = None;
    let mut icon = None;
    let mut launch_target = None;

    if let Some(account_id) = fields.account_id() {
        title = accounts.display_name(account_id);
        if title.is_none() {
            warn!("Account not found {}", account_id);
        }

        let service = fields.service_name().unwrap_or_default();
        if accounts.has_service(service) {
            // Only the first application is considered.
            match accounts.applications(service).into_iter().next() {
                Some(app) => {
                    icon = app.icon.clone();
                    launch_target = Some(app.launch_target());
                }
                None => warn!("No application found for service {}", service),
            }
        } else {
            warn!("Service not found {}", service);
        }
    }

    let title = title
        .or_else(|| fields.display_name().map(str::to_string))
        .unwrap_or_else(|| category.default_title());
    let icon = icon.unwrap_or_else(|| category.default_icon().to_string());
    let launch_target = launch_target.or_else(|| category.default_launch_target());

    debug!("Profile {} resolved to \"{}\" ({})", profile_id, title, category.as_str());

    TransferMetadata {
        title,
        icon,
        category,
        launch_target,
    }
}

/// Opens application URLs
pub trait Launcher {
    fn launch(&self, url: &str) -> Result<(), BridgeError>;
}

/// Launcher using the desktop's URL handlers
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, url: &str) -> Result<(), BridgeError> {
        open::that_detached(url).map_err(|e| BridgeError::Launch {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

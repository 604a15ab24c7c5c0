//! Bridge Configuration
//!
//! Configuration can be loaded from:
//! - Default values
//! - Config file (~/.config/sync-status-bridge/config.toml)
//! - Command line overrides (see `main.rs`)
//!
//! An unreadable or invalid file is reported to the caller, which falls back
//! to the defaults once logging is up.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::accounts::{AccountEntry, ConfiguredAccounts, ServiceEntry};
use crate::dbus::BusKind;
use crate::transport::DaemonAddress;

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bus msyncd lives on
    pub bus: BusKind,

    /// Where to find msyncd on that bus
    pub daemon: DaemonAddress,

    /// Connect as soon as the bridge starts
    pub auto_connect: bool,

    /// Default log filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Serve the web API on this port
    pub web_port: Option<u16>,

    /// Online accounts, by id
    pub accounts: Vec<AccountEntry>,

    /// Applications registered per sync service
    pub services: Vec<ServiceEntry>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::Session,
            daemon: DaemonAddress::default(),
            auto_connect: true,
            log_level: "info".to_string(),
            web_port: None,
            accounts: Vec::new(),
            services: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("sync-status-bridge/config.toml"))
            .unwrap_or_else(|| PathBuf::from("sync-status-bridge.toml"))
    }

    /// Read configuration from `path`. A missing file yields the defaults.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Ignoring invalid config {}", path.display()))
    }

    pub fn account_directory(&self) -> ConfiguredAccounts {
        ConfiguredAccounts::new(&self.accounts, &self.services)
    }
}

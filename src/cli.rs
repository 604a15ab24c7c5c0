//! CLI tool for talking to msyncd directly
//!
//! # Usage
//!
//! Start a sync for a profile:
//! ```bash
//! sync-status-cli start my-contacts-profile
//! ```
//!
//! Dump what the bridge would learn about a profile:
//! ```bash
//! sync-status-cli profile my-contacts-profile
//! ```
//!
//! Print decoded status notifications as they arrive:
//! ```bash
//! sync-status-cli watch
//! ```

use std::collections::HashMap;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use sync_status_bridge::dbus::{BusKind, ZbusTransport};
use sync_status_bridge::profile::ProfileFields;
use sync_status_bridge::status::{translate, ProgressTracker, StatusNotification};
use sync_status_bridge::transport::{
    BusHandle, DaemonAddress, ReplyShape, Transport, ABORT_SYNC, START_SYNC, SYNC_PROFILE,
    SYNC_STATUS_SIGNAL,
};

#[derive(Parser, Debug)]
#[command(name = "sync-status-cli")]
#[command(about = "CLI tool for testing msyncd and the sync status bridge")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Bus msyncd is registered on
    #[arg(long, value_enum, default_value = "session")]
    bus: BusKind,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask msyncd to sync a profile
    Start { profile: String },

    /// Ask msyncd to abort a profile's sync
    Abort { profile: String },

    /// Print the key/value fields of a profile as JSON
    Profile {
        profile: String,
        /// Print the raw XML instead
        #[arg(long)]
        raw: bool,
    },

    /// List profiles currently syncing
    Running,

    /// Print decoded syncStatus signals until interrupted
    Watch,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let args = Args::parse();
    let daemon = DaemonAddress::default();
    let handle = ZbusTransport::new(args.bus).connect().await?;

    match args.command {
        Commands::Start { profile } => {
            let accepted = handle
                .call(&daemon, START_SYNC, &profile, ReplyShape::Bool)
                .await?
                .into_bool()?;
            println!("{}", json!({ "profile": profile, "accepted": accepted }));
            if !accepted {
                std::process::exit(1);
            }
        }

        Commands::Abort { profile } => {
            handle.call(&daemon, ABORT_SYNC, &profile, ReplyShape::Unit).await?;
            println!("{}", json!({ "profile": profile, "aborted": true }));
        }

        Commands::Profile { profile, raw } => {
            let xml = handle
                .call(&daemon, SYNC_PROFILE, &profile, ReplyShape::Text)
                .await?
                .into_text()?;
            if raw {
                println!("{}", xml);
            } else {
                let fields = ProfileFields::parse(&xml)?;
                println!("{}", serde_json::to_string_pretty(&fields)?);
            }
        }

        Commands::Running => {
            let proxy = zbus::Proxy::new(
                handle.connection(),
                daemon.service.as_str(),
                daemon.path.as_str(),
                daemon.interface.as_str(),
            )
            .await?;
            let running: Vec<String> = proxy.call("runningSyncs", &()).await?;
            println!("{}", serde_json::to_string_pretty(&running)?);
        }

        Commands::Watch => {
            let mut subscription = handle.subscribe(&daemon, SYNC_STATUS_SIGNAL).await?;
            let mut trackers: HashMap<String, (ProgressTracker, Option<f64>)> = HashMap::new();

            loop {
                let raw = tokio::select! {
                    raw = subscription.next() => match raw {
                        Some(raw) => raw,
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                };

                let notification = match StatusNotification::try_from(raw) {
                    Ok(notification) => notification,
                    Err(code) => {
                        warn!("Unexpected status {}", code);
                        continue;
                    }
                };

                let (tracker, progress) = trackers
                    .entry(notification.profile_id.clone())
                    .or_insert((ProgressTracker::default(), Some(0.0)));
                let translation = translate(*tracker, *progress, &notification);
                *tracker = translation.tracker;
                *progress = translation.progress;

                println!(
                    "{}",
                    json!({
                        "profile": notification.profile_id,
                        "status": format!("{:?}", notification.status),
                        "detail": format!("{:?}", notification.detail),
                        "state": translation.state,
                        "progress": translation.progress,
                        "error": translation.error,
                        "label": translation.label,
                    })
                );
            }
        }
    }

    Ok(())
}

//! Sync Status Bridge
//!
//! Watches msyncd on D-Bus and shows every profile's sync as a transfer.
//!
//! # Architecture
//!
//! - Main thread: Runs the egui indicator window
//! - Bridge thread: Single-threaded tokio runtime owning the bridge, plus the web server
//! - Commands flow into the bridge over an mpsc channel; registry events flow
//!   out to the window (std channel) and WebSocket clients (broadcast)
//!
//! # Usage
//!
//! ```bash
//! sync-status-bridge
//! sync-status-bridge --headless --web-port 8080
//! ```

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sync_status_bridge::accounts::SystemLauncher;
use sync_status_bridge::dbus::{BusKind, ZbusTransport};
use sync_status_bridge::web::{self, WebState};
use sync_status_bridge::{gui, Bridge, BridgeConfig, Command, ModelEvent};

#[derive(Parser, Debug)]
#[command(name = "sync-status-bridge")]
#[command(about = "Shows msyncd sync activity as transfers")]
#[command(version)]
struct Args {
    /// Run in headless mode (no window)
    #[arg(long)]
    headless: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Config file (default: ~/.config/sync-status-bridge/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable the web API on this port
    #[arg(long)]
    web_port: Option<u16>,

    /// Bus msyncd is registered on
    #[arg(long, value_enum)]
    bus: Option<BusKind>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(BridgeConfig::default_path);
    let (mut config, config_error) = match BridgeConfig::read(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (BridgeConfig::default(), Some(e)),
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(port) = args.web_port {
        config.web_port = Some(port);
    }
    if let Some(bus) = args.bus {
        config.bus = bus;
    }

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting Sync Status Bridge v{}", env!("CARGO_PKG_VERSION"));
    if let Some(e) = config_error {
        warn!("{:#}", e);
    }

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let web_state = WebState::new(command_tx.clone());
    let shutdown = CancellationToken::new();

    let (gui_tx, gui_rx) = if args.headless {
        (None, None)
    } else {
        let (tx, rx) = std_mpsc::channel();
        (Some(tx), Some(rx))
    };

    let bridge_shutdown = shutdown.clone();
    let bridge_thread = std::thread::Builder::new()
        .name("sync-bridge".into())
        .spawn(move || run_bridge(config, command_rx, web_state, gui_tx, bridge_shutdown))?;

    match gui_rx {
        None => {
            info!("Running in headless mode (no window)");
            info!("Press Ctrl+C to stop");
        }
        Some(events) => {
            info!("Starting GUI...");

            // Run GUI on main thread (required for graphics)
            if let Err(e) = gui::run_gui_sync(command_tx.clone(), events) {
                error!("GUI error: {}", e);
            }

            info!("GUI closed");
            shutdown.cancel();
        }
    }

    match bridge_thread.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("Bridge thread panicked"),
    }
}

/// Own the bridge on a current-thread runtime until shutdown
fn run_bridge(
    config: BridgeConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    web_state: WebState,
    gui_tx: Option<std_mpsc::Sender<ModelEvent>>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    runtime.block_on(async move {
        let mut bridge = Bridge::new(
            ZbusTransport::new(config.bus),
            config.daemon.clone(),
            Box::new(config.account_directory()),
            Box::new(SystemLauncher),
        );

        let updates_tx = web_state.updates_tx.clone();
        bridge.observe(move |event| {
            // No subscribers is fine
            let _ = updates_tx.send(event.clone());
        });
        if let Some(gui_tx) = gui_tx {
            bridge.observe(move |event| {
                let _ = gui_tx.send(event.clone());
            });
        }

        // Start web server for remote access
        if let Some(port) = config.web_port {
            let state = web_state.clone();
            tokio::spawn(async move {
                if let Err(e) = web::start_web_server(state, port).await {
                    error!("Failed to start web server: {}", e);
                }
            });
        }

        let interrupt = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted");
                interrupt.cancel();
            }
        });

        if config.auto_connect {
            bridge.connect();
        } else {
            info!("Auto-connect disabled, waiting for a connect command");
        }

        // Dropping the bridge tears it down
        tokio::select! {
            _ = bridge.run(commands) => {}
            _ = shutdown.cancelled() => info!("Shutting down"),
        }

        // Keeps the command channel open until here
        drop(web_state);
    });

    Ok(())
}

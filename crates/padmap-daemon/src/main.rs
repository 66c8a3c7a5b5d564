//! padmap daemon
//!
//! Grabs the configured target device, remaps its keys through a virtual
//! keyboard, and serves the control socket for the CLI.

mod detect;
mod device;
mod engine;
mod error;
mod filter;
mod hotplug;
mod injector;
mod ipc;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use engine::{Engine, EngineEvent};

#[derive(Parser, Debug)]
#[command(name = "padmapd")]
#[command(about = "Device-scoped key remapping daemon")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/padmap/config.json")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();
    tracing::info!("loading configuration from {}", config_path.display());
    let config = padmap_config::load_config(&config_path)?;

    tracing::info!(
        "configuration: {} mapping(s), target {}",
        config.table.len(),
        config
            .target_device
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unset".to_string())
    );

    let virtual_device = injector::create_shared_virtual_device("padmap")?;

    let (hotplug_tx, hotplug_rx) = mpsc::channel(16);
    hotplug::spawn_monitor(hotplug_tx)?;

    let handle = Engine::spawn(config, config_path, virtual_device, hotplug_rx);

    // Surface engine errors in the daemon log even when no CLI is attached.
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::EngineError { kind, detail }) => {
                    tracing::warn!("engine error [{}]: {}", kind.as_str(), detail);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    handle.start().await?;

    let server = ipc::IpcServer::new()?;

    loop {
        tokio::select! {
            accepted = server.accept() => {
                let stream = match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let engine = handle.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        ipc::handle_connection(stream, move |req| async move {
                            ipc::dispatch(req, &engine).await
                        })
                        .await
                    {
                        tracing::warn!("control connection error: {}", e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    // Releases the grab and closes out held keys before exit.
    handle.stop().await?;

    Ok(())
}

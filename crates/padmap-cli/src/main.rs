//! padmap CLI
//!
//! Talks to the running daemon over its control socket. Key names are
//! resolved to codes here; the daemon and the wire protocol only ever see
//! numeric codes.

use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{miette, IntoDiagnostic};
use padmap_config::keys::{display_key, parse_key};
use padmap_config::protocol::{self, Request, Response};
use padmap_config::{DeviceId, KeyCode};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser, Debug)]
#[command(name = "padmap")]
#[command(about = "Device-scoped key remapping control tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show engine status and the current mapping table
    Status,

    /// List connected keyboard devices
    Devices,

    /// Identify a device by pressing a key on it, then set it as the target
    Detect {
        /// Give up after this many seconds
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,

        /// Only report the detected device, do not set it as the target
        #[arg(long)]
        no_set: bool,
    },

    /// Set the target device by id (as shown by `devices`)
    SetTarget {
        /// Device id, omit with --clear to unset
        device: Option<String>,

        /// Clear the target device
        #[arg(long, conflicts_with = "device")]
        clear: bool,
    },

    /// Add a mapping from one key to another
    Map {
        /// Source key name (e.g. "A", "CapsLock", "F13")
        source: String,
        /// Target key name
        target: String,
    },

    /// Remove the mapping for a key
    Unmap {
        /// Source key name
        source: String,
    },

    /// Enable the mapping table
    Enable,

    /// Disable the mapping table (everything passes through)
    Disable,

    /// Start the remap engine
    Start,

    /// Stop the remap engine and release the target device
    Stop,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => cmd_status().await,
        Commands::Devices => cmd_devices().await,
        Commands::Detect { timeout, no_set } => cmd_detect(timeout, no_set).await,
        Commands::SetTarget { device, clear } => cmd_set_target(device, clear).await,
        Commands::Map { source, target } => cmd_map(&source, &target).await,
        Commands::Unmap { source } => cmd_unmap(&source).await,
        Commands::Enable => cmd_set_enabled(true).await,
        Commands::Disable => cmd_set_enabled(false).await,
        Commands::Start => cmd_simple(Request::Start, "Engine started").await,
        Commands::Stop => cmd_simple(Request::Stop, "Engine stopped").await,
    }
}

async fn cmd_status() -> miette::Result<()> {
    let status = match send_request(Request::Status).await? {
        Response::Status { status } => status,
        other => return Err(unexpected(other)),
    };

    println!("Engine:   {}", status.lifecycle);
    println!(
        "Target:   {}",
        status
            .target_device
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(unset)".to_string())
    );
    println!("Mappings: {}", if status.enabled { "enabled" } else { "disabled" });
    if status.detecting {
        println!("Detection session active");
    }

    if status.mappings.is_empty() {
        println!("\nNo mappings configured.");
    } else {
        println!();
        for entry in &status.mappings {
            println!("  {} -> {}", display_key(entry.source), display_key(entry.target));
        }
    }

    Ok(())
}

async fn cmd_devices() -> miette::Result<()> {
    let devices = match send_request(Request::ListDevices).await? {
        Response::Devices { devices } => devices,
        other => return Err(unexpected(other)),
    };

    if devices.is_empty() {
        println!("No keyboard devices found.");
        return Ok(());
    }

    println!("Connected keyboard devices:\n");
    for device in devices {
        println!("  {} [{}]", device.name, device.vendor_product);
        println!("    Id:   {}", device.id);
        println!("    Path: {}", device.path.display());
        println!();
    }

    Ok(())
}

async fn cmd_detect(timeout: u64, no_set: bool) -> miette::Result<()> {
    println!("Press a key on the device you want to target...");

    let outcome = tokio::time::timeout(
        Duration::from_secs(timeout),
        send_request(Request::Detect),
    )
    .await;

    let device = match outcome {
        Ok(response) => match response? {
            Response::Detected { device } => device,
            Response::Cancelled => {
                println!("Detection cancelled.");
                return Ok(());
            }
            other => return Err(unexpected(other)),
        },
        Err(_) => {
            // Timed out locally; tell the daemon to stop listening too.
            let _ = send_request(Request::CancelDetect).await;
            return Err(miette!("no key press seen within {} second(s)", timeout));
        }
    };

    println!("Detected device: {}", device);

    if !no_set {
        set_target(Some(device)).await?;
        println!("Target device set.");
    }

    Ok(())
}

async fn cmd_set_target(device: Option<String>, clear: bool) -> miette::Result<()> {
    let device = if clear {
        None
    } else {
        match device {
            Some(id) => Some(DeviceId::new(id)),
            None => return Err(miette!("provide a device id, or --clear to unset")),
        }
    };

    let cleared = device.is_none();
    set_target(device).await?;
    if cleared {
        println!("Target device cleared.");
    } else {
        println!("Target device set.");
    }
    Ok(())
}

async fn set_target(device: Option<DeviceId>) -> miette::Result<()> {
    match send_request(Request::SetTarget { device }).await? {
        Response::Success { .. } => Ok(()),
        other => Err(unexpected(other)),
    }
}

async fn cmd_map(source: &str, target: &str) -> miette::Result<()> {
    let source_code = parse_key_arg(source)?;
    let target_code = parse_key_arg(target)?;

    match send_request(Request::AddMapping {
        source: source_code,
        target: target_code,
    })
    .await?
    {
        Response::Success { .. } => {
            println!(
                "Mapped {} -> {}",
                display_key(source_code),
                display_key(target_code)
            );
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn cmd_unmap(source: &str) -> miette::Result<()> {
    let source_code = parse_key_arg(source)?;

    match send_request(Request::RemoveMapping {
        source: source_code,
    })
    .await?
    {
        Response::Success { .. } => {
            println!("Unmapped {}", display_key(source_code));
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn cmd_set_enabled(enabled: bool) -> miette::Result<()> {
    match send_request(Request::SetEnabled { enabled }).await? {
        Response::Success { .. } => {
            println!(
                "Mapping table {}.",
                if enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

async fn cmd_simple(request: Request, success: &str) -> miette::Result<()> {
    match send_request(request).await? {
        Response::Success { .. } => {
            println!("{}", success);
            Ok(())
        }
        other => Err(unexpected(other)),
    }
}

fn parse_key_arg(name: &str) -> miette::Result<KeyCode> {
    parse_key(name).ok_or_else(|| miette!("unknown key name: {:?}", name))
}

/// One request/response exchange with the daemon.
async fn send_request(request: Request) -> miette::Result<Response> {
    let socket_path = protocol::socket_path();

    let mut stream = UnixStream::connect(&socket_path).await.map_err(|e| {
        miette!(
            "could not connect to {} ({}); is padmapd running?",
            socket_path.display(),
            e
        )
    })?;

    let request_json = serde_json::to_string(&request).into_diagnostic()?;
    stream
        .write_all(request_json.as_bytes())
        .await
        .into_diagnostic()?;
    stream.write_all(b"\n").await.into_diagnostic()?;
    stream.flush().await.into_diagnostic()?;

    let (reader, _writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await.into_diagnostic()?;

    let response: Response = serde_json::from_str(line.trim())
        .map_err(|e| miette!("malformed response from daemon: {}", e))?;

    Ok(response)
}

fn unexpected(response: Response) -> miette::Report {
    match response {
        Response::Error { message } => miette!("{}", message),
        other => miette!("unexpected response from daemon: {:?}", other),
    }
}

//! accessory-kit host
//!
//! Command-line host that switches an attached Android device into accessory
//! mode and exchanges framed text messages with it over bulk USB.

mod config;
mod usb;

use anyhow::{Context, Result};
use clap::Parser;
use common::{ChannelConfig, MessageChannel, setup_logging};
use std::io::BufRead;
use std::thread;
use tracing::{error, info};
use usb::HostConnector;

#[derive(Parser, Debug)]
#[command(name = "aoa-host")]
#[command(
    author,
    version,
    about = "Accessory-mode USB host - exchange messages with an Android device"
)]
#[command(long_about = "
Switches an attached Android device into accessory mode and opens a framed
message link over its bulk endpoints. Lines read from stdin are sent to the
device; messages from the device are printed to stdout.

EXAMPLES:
    # Run with default config
    aoa-host

    # Run with custom config
    aoa-host --config /path/to/host.toml

    # List candidate devices without connecting
    aoa-host --probe

    # Run with debug logging
    aoa-host --log-level debug

CONFIGURATION:
    The host looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/accessory-kit/host.toml
    3. /etc/accessory-kit/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List candidate devices and exit
    #[arg(long)]
    probe: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = config::HostConfig::default();
        let path = config::HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::HostConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::HostConfig::load_or_default()
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.host.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("accessory-kit host v{}", env!("CARGO_PKG_VERSION"));

    if args.probe {
        return probe_devices();
    }

    run_interactive(config)
}

/// List candidate devices and exit
fn probe_devices() -> Result<()> {
    use rusb::UsbContext;

    let context = rusb::Context::new().context("Failed to initialize USB context")?;
    let candidates =
        usb::device::discover_candidates(&context).context("Failed to enumerate USB bus")?;

    if candidates.is_empty() {
        println!("No candidate devices found.");
        return Ok(());
    }

    println!("Found {} candidate device(s):\n", candidates.len());
    for candidate in candidates {
        let role = if candidate.is_accessory() {
            "accessory mode"
        } else {
            "android device"
        };
        println!(
            "  {:04x}:{:04x}  Bus {:03} Device {:03}  [{}]",
            candidate.vendor_id,
            candidate.product_id,
            candidate.device.bus_number(),
            candidate.device.address(),
            role
        );
    }
    Ok(())
}

/// Connect and bridge stdin/stdout to the message channel
fn run_interactive(config: config::HostConfig) -> Result<()> {
    let connector = HostConnector::new(config.identity.clone(), config.usb.clone())
        .context("Failed to initialize USB connector")?;
    let channel = MessageChannel::with_config(Box::new(connector), ChannelConfig::default());

    let messages = channel.subscribe_messages();
    thread::spawn(move || {
        while let Ok(message) = messages.recv_blocking() {
            println!("<< {message}");
        }
    });

    let states = channel.subscribe_state();
    thread::spawn(move || {
        while let Ok(state) = states.recv_blocking() {
            info!("connection state: {state}");
        }
    });

    channel.connect().context("Failed to request connect")?;
    println!("Type messages to send; /quit or EOF exits.");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "/quit" {
            break;
        }
        if let Err(e) = channel.send(trimmed) {
            error!("send failed: {e}");
        }
    }

    info!("shutting down");
    channel.dispose();
    Ok(())
}

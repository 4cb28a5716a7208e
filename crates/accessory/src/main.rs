//! accessory-kit accessory
//!
//! Command-line accessory endpoint. Takes the descriptor or device path the
//! platform delivered after negotiation and bridges stdin/stdout to the
//! framed message link.

use accessory::AccessoryConnector;
use anyhow::{Context, Result, bail};
use clap::Parser;
use common::{ChannelConfig, MessageChannel, setup_logging};
use std::io::BufRead;
use std::os::fd::{FromRawFd, OwnedFd};
use std::thread;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "aoa-accessory")]
#[command(
    author,
    version,
    about = "Accessory-mode USB endpoint - exchange messages with a host"
)]
struct Args {
    /// Inherited file descriptor for the open accessory stream
    #[arg(long, value_name = "FD", conflicts_with = "path")]
    fd: Option<i32>,

    /// Path to the accessory character device
    #[arg(long, value_name = "PATH")]
    path: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level).context("Failed to setup logging")?;

    info!("accessory-kit accessory v{}", env!("CARGO_PKG_VERSION"));

    let connector = match (args.fd, args.path) {
        (Some(fd), None) => {
            if fd < 0 {
                bail!("--fd must be a non-negative descriptor");
            }
            // The descriptor was inherited from the parent process and is
            // owned by nobody else from here on
            let owned = unsafe { OwnedFd::from_raw_fd(fd) };
            AccessoryConnector::from_fd(owned)
        }
        (None, Some(path)) => AccessoryConnector::from_path(path),
        _ => bail!("exactly one of --fd or --path is required"),
    };

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

//! Control-message sender tool.
//!
//! Connects to the hub's service endpoint and enqueues numbered control
//! messages for one device at a fixed period, until interrupted. Used to
//! exercise the device-side poll path of a running fleet.

use anyhow::{Context, Result};
use clap::Parser;
use fleetlab_core::types::Envelope;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Sends control messages to a simulated device through the hub
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Hub service endpoint (host:port)
    #[arg(long, env = "FLEETLAB_HUB_ADDR")]
    hub_addr: String,

    /// Target device identity
    #[arg(short, long)]
    device_id: String,

    /// First message identifier
    #[arg(long, default_value_t = 0)]
    message_seed: u64,

    /// Seconds between messages (minimum 1)
    #[arg(long, default_value_t = 1)]
    period_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!(hub_addr = %args.hub_addr, device_id = %args.device_id, "connecting to hub");
    let mut stream = TcpStream::connect(&args.hub_addr)
        .await
        .with_context(|| format!("Failed to connect to {}", args.hub_addr))?;
    info!("connected");

    let period = Duration::from_secs(args.period_secs.max(1));
    let mut identifier = args.message_seed;

    loop {
        let envelope = Envelope::SendControl {
            device_id: args.device_id.clone(),
            message_id: identifier.to_string(),
            body: identifier.to_string(),
        };
        let mut line = serde_json::to_vec(&envelope).context("Failed to encode envelope")?;
        line.push(b'\n');

        stream
            .write_all(&line)
            .await
            .context("Failed to send control message")?;
        info!(
            message_id = identifier,
            device_id = %args.device_id,
            "sent control message"
        );

        tokio::select! {
            _ = signal::ctrl_c() => break,
            _ = tokio::time::sleep(period) => {}
        }

        identifier += 1;
    }

    info!("sender stopped");
    Ok(())
}

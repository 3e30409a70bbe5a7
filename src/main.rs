use anyhow::{Context, Result};
use clap::Parser;
use fleetlab_core::config::SimulatorConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod runner;

use runner::DeviceRunner;

/// FleetLab - simulates a fleet of devices against a remote hub
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/fleetlab.yaml")]
    config: PathBuf,

    /// Override the device list (`;`/`,`-separated ids)
    #[arg(short, long, env = "FLEETLAB_DEVICE_LIST")]
    devices: Option<String>,

    /// Override the hub endpoint
    #[arg(long)]
    hub_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = SimulatorConfig::load(&args.config)
        .with_context(|| format!("Failed to load config file: {:?}", args.config))?;

    if let Some(devices) = &args.devices {
        config.devices = SimulatorConfig::parse_device_list(devices);
    }
    if let Some(hub_addr) = args.hub_addr {
        config.hub_addr = hub_addr;
    }

    config.validate().context("Invalid configuration")?;

    info!(
        hub_addr = %config.hub_addr,
        devices = config.devices.len(),
        coalesced_poll = config.coalesced_poll,
        "starting device fleet"
    );

    let config = Arc::new(config);
    let cancel = CancellationToken::new();
    let mut runners = Vec::new();

    for device_id in &config.devices {
        let runner = DeviceRunner::new(device_id.clone(), Arc::clone(&config));
        let cancel = cancel.clone();
        runners.push(tokio::spawn(runner.run(cancel)));
        info!(device_id = %device_id, "started device runner");

        tokio::time::sleep(config.kickoff_delay()).await;
    }

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested, stopping fleet");
    cancel.cancel();

    for runner in runners {
        if let Err(e) = runner.await {
            warn!(error = %e, "device runner ended abnormally");
        }
    }

    info!("fleet stopped");
    Ok(())
}

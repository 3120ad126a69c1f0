mod collector;
mod handler;
mod inventory;
mod ipc;
mod server;
mod tasks;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// vmctl-sim - Simulated virtualization management endpoint
#[derive(Parser, Debug)]
#[command(name = "vmctl-sim")]
#[command(version)]
#[command(about = "Simulated management endpoint for vmctl", long_about = None)]
struct Args {
    /// Configuration file (default: ~/.vmctl/sim.json when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the listen address from the configuration
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let mut config = vmctl_common::SimConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    tracing::info!("vmctl-sim starting...");
    tracing::info!("Listen address: {}", config.listen_addr);
    tracing::info!("Change granularity: {:?}", config.granularity);
    tracing::info!("Inventory: {} vm(s)", config.inventory.len());

    let endpoint = server::Endpoint::new(config);
    endpoint.run().await?;

    Ok(())
}

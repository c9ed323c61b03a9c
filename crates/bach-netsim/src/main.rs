//! BachLedger peering simulator
//!
//! Runs a mesh of nodes in one process and reports whether every chain ended
//! up fully connected.

mod cli;
mod codec;
mod config;
mod sim;

use anyhow::{bail, Result};
use cli::Cli;
use config::{load_config, SimConfig};
use sim::Simulation;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    tracing::info!("BachLedger peering simulator starting...");

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => SimConfig::default(),
    };

    let mut sim = Simulation::start(config, cli.nodes, cli.chains)?;
    let outcome = sim
        .run(Duration::from_secs(cli.duration_secs), cli.restart_chain)
        .await;
    let report = sim.report();
    sim.shutdown();
    outcome?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.converged {
        bail!("mesh did not converge");
    }

    tracing::info!("Simulation converged");
    Ok(())
}

//! CLI argument parsing for bach-netsim

use bach_primitives::ChainId;
use clap::Parser;
use std::path::PathBuf;

/// Simulate a BachLedger peering mesh in one process
#[derive(Parser, Debug, Clone)]
#[command(name = "bach-netsim")]
#[command(about = "Run N nodes x M chains over the in-process transport")]
#[command(version)]
pub struct Cli {
    /// Number of nodes
    #[arg(long, default_value = "4")]
    pub nodes: usize,

    /// Number of chains every node runs
    #[arg(long, default_value = "2")]
    pub chains: usize,

    /// How long to exchange packets, in seconds
    #[arg(long, default_value = "5")]
    pub duration_secs: u64,

    /// Restart this chain on the first node halfway through the run
    #[arg(long)]
    pub restart_chain: Option<ChainId>,

    /// JSON config file (optional, uses defaults if not specified)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

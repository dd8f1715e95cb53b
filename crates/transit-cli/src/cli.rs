//! Command line arguments

use clap::Parser;
use std::path::PathBuf;

/// Move a running AuRa network from POA rewards to the POSDAO contracts
///
/// Migration parameters come from the environment: `OWNER`,
/// `INITIAL_VALIDATORS`, `STAKING_ADDRESSES`, `FIRST_VALIDATOR_IS_UNREMOVABLE`,
/// `COLLECT_ROUND_LENGTH`, `STAKING_EPOCH_DURATION` and
/// `STAKE_WITHDRAW_DISALLOW_PERIOD`.
#[derive(Debug, Clone, Parser)]
#[command(name = "posdao-transit", version, about)]
pub struct Cli {
    /// TOML tuning file; every field has a default
    #[arg(short, long, env = "TRANSIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSON-RPC endpoint of the node the migration talks to
    #[arg(long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// Chain spec document shared by every node
    #[arg(long, env = "SPEC_PATH")]
    pub spec: Option<PathBuf>,

    /// Seed for the node restart order
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the final report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Validate configuration and parameters, then exit without touching the
    /// chain or the nodes
    #[arg(long)]
    pub check: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

/// loyalty-mock: tier ladder engine behind the loyalty mock API.
#[derive(Parser, Debug)]
#[command(name = "loyalty-mock", version)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    /// Catalog JSON file (falls back to $LADDER_CATALOG, then the built-in catalog)
    #[arg(long, global = true)]
    pub catalog: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the tier, badge and special tier catalog
    Catalog,

    /// Print the fee discount table
    Fees(FeesArgs),

    /// Evaluate a volume and badge set against the ladder
    Evaluate(EvaluateArgs),

    /// Replay a JSON-lines request script against a fresh engine
    Replay(ReplayArgs),

    /// Replay the bundled walkthrough script
    Demo(EngineArgs),
}

/// Arguments for the `fees` subcommand.
#[derive(Parser, Debug)]
pub struct FeesArgs {
    /// Output as JSON instead of TSV
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `evaluate` subcommand.
#[derive(Parser, Debug)]
pub struct EvaluateArgs {
    /// Cumulative trading volume in USDT
    pub volume: Decimal,

    /// Owned (not yet activated) badge ids, comma separated
    #[arg(long, value_delimiter = ',')]
    pub owned: Vec<u32>,

    /// Activated badge ids, comma separated
    #[arg(long, value_delimiter = ',')]
    pub activated: Vec<u32>,
}

/// Arguments for the `replay` subcommand.
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Request script: one request per line, blank lines separate batches
    pub script: PathBuf,

    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Engine tuning shared by `replay` and `demo`.
#[derive(Parser, Debug)]
pub struct EngineArgs {
    /// Upper bound for one ledger call (ms)
    #[arg(long, default_value = "30000")]
    pub ledger_timeout_ms: u64,

    /// Resume attempts allowed for one pending upgrade
    #[arg(long, default_value = "3")]
    pub max_upgrade_retries: u32,

    /// Age after which a pending upgrade needs reconciliation (ms)
    #[arg(long, default_value = "600000")]
    pub pending_timeout_ms: u64,

    /// Interval of the stale-upgrade sweep (ms)
    #[arg(long, default_value = "60000", value_parser = clap::value_parser!(u64).range(1..))]
    pub reconcile_interval_ms: u64,
}

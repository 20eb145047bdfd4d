mod cli;
mod error;
mod output;
mod replay;
mod routes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use cli::{Command, EngineArgs};
use ladder::{Catalog, EngineConfig, TierEngine};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;

const DEMO_SCRIPT: &str = include_str!("../scripts/demo.jsonl");

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Initialize tracing
    let filter = cli
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let _ = dotenvy::dotenv(); // load .env if present

    // Shared cancellation token + signal handlers.
    let cancel = setup_signal_handlers();

    if let Err(e) = run(cli, cancel).await {
        tracing::error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}

async fn run(cli: cli::Cli, cancel: CancellationToken) -> Result<()> {
    let catalog = Arc::new(load_catalog(cli.catalog)?);
    let mut out = std::io::stdout().lock();

    match cli.command {
        Command::Catalog => {
            output::write_json_line(&mut out, catalog.as_ref())?;
        }

        Command::Fees(args) => {
            let rows = catalog.fee_structure();
            if args.json {
                output::write_json_line(&mut out, &rows)?;
            } else {
                output::write_fee_table(&mut out, &rows)?;
            }
        }

        Command::Evaluate(args) => {
            let snapshot = ladder::progression::evaluate_progress(
                &catalog,
                args.volume,
                &args.owned,
                &args.activated,
            )?;
            output::write_json_line(&mut out, &snapshot)?;
        }

        Command::Replay(args) => {
            let text = std::fs::read_to_string(&args.script)?;
            let batches = replay::parse_script(&args.script, &text)?;
            info!(path = %args.script.display(), batches = batches.len(), "replay starting");
            let engine = Arc::new(TierEngine::in_memory(catalog, engine_config(&args.engine)));
            let summary = replay::run_replay(engine, batches, &mut out, cancel).await?;
            output::write_json_line(&mut std::io::stderr(), &summary)?;
        }

        Command::Demo(args) => {
            let batches = replay::parse_script(Path::new("demo.jsonl"), DEMO_SCRIPT)?;
            let engine = Arc::new(TierEngine::in_memory(catalog, engine_config(&args)));
            replay::run_replay(Arc::clone(&engine), batches, &mut out, cancel).await?;
            output::write_json_line(&mut out, &engine.ledger().entries())?;
        }
    }

    Ok(())
}

/// `--catalog`, then `$LADDER_CATALOG`, then the built-in catalog.
fn load_catalog(flag: Option<PathBuf>) -> Result<Catalog> {
    let path = flag.or_else(|| std::env::var_os("LADDER_CATALOG").map(PathBuf::from));
    let catalog = match path {
        Some(path) => Catalog::load(&path)?,
        None => Catalog::builtin()?,
    };
    info!(
        max_level = catalog.max_level(),
        base_fee_rate = %catalog.base_fee_rate(),
        "catalog ready"
    );
    Ok(catalog)
}

fn engine_config(args: &EngineArgs) -> EngineConfig {
    EngineConfig {
        ledger_timeout_ms: args.ledger_timeout_ms,
        max_upgrade_retries: args.max_upgrade_retries,
        pending_timeout_ms: args.pending_timeout_ms,
        reconcile_interval_ms: args.reconcile_interval_ms,
        ..Default::default()
    }
}

/// Register SIGINT and SIGTERM handlers that trigger the returned token.
fn setup_signal_handlers() -> CancellationToken {
    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received SIGINT, shutting down");
        cancel_clone.cancel();
    });

    #[cfg(unix)]
    {
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                    info!("received SIGTERM, shutting down");
                    cancel_clone.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "failed to register SIGTERM handler"),
            }
        });
    }

    cancel
}

//! mqk-engine entry point.
//!
//! Thin by design: this file sets up tracing, parses the CLI, acquires the
//! lifecycle lock, and drives the tick loop. All cycle logic lives in
//! `mqk_runtime::Engine`.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use mqk_audit::{AuditWriter, RotationPolicy};
use mqk_broker_historical::HistoricalBroker;
use mqk_runtime::{run_until_stopped, spawn_signal_watcher, Engine, EngineConfig, EngineLock};
use mqk_store::StrategyStore;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "mqk-engine")]
#[command(about = "Strategy evaluation engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine cycle against the strategy store in `dir` until stopped.
    Run {
        #[arg(long)]
        dir: PathBuf,
        /// Allow orders to reach a live broker. Defaults to off (paper-safe).
        #[arg(long, default_value_t = false)]
        allow_production: bool,
    },
    /// Cancel one strategy immediately, independent of the next tick.
    Cancel {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        strategy_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let exit_code = match cli.cmd {
        Commands::Run { dir, allow_production } => run(dir, allow_production).await,
        Commands::Cancel { dir, strategy_id } => cancel_one(dir, strategy_id),
    };

    match exit_code {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(%err, "engine exiting with error");
            std::process::exit(1);
        }
    }
}

async fn run(dir: PathBuf, allow_production: bool) -> anyhow::Result<()> {
    let mut config = EngineConfig::conservative_defaults(&dir);
    config.policy.allow_production = allow_production;

    let owner = format!("{}@{}", std::process::id(), hostname());
    let lock = EngineLock::acquire(&config.lock_path, &owner, Utc::now()).context("acquire engine lock")?;
    info!(owner = %owner, lock = ?config.lock_path, "engine lock acquired");

    let store = StrategyStore::new(&config.strategy_store_path);
    let order_audit = AuditWriter::with_rotation(&config.order_audit_path, true, RotationPolicy::size_or_daily(64 * 1024 * 1024))
        .context("open order audit log")?;
    let engine_audit = AuditWriter::with_rotation(&config.engine_audit_path, true, RotationPolicy::size_or_daily(64 * 1024 * 1024))
        .context("open engine audit log")?;
    let run_id = Uuid::new_v4();

    let mut engine = Engine::new(
        HistoricalBroker::new(),
        store,
        order_audit,
        engine_audit,
        run_id,
        config.initial_cash_micros,
        config.policy.clone(),
    );

    let stop = Arc::new(AtomicBool::new(false));
    spawn_signal_watcher(Arc::clone(&stop), config.lock_path.clone());
    run_until_stopped(&mut engine, config.tick_period, stop).await;

    info!("shutting down: flushing and releasing lock");
    lock.release().context("release engine lock")?;
    Ok(())
}

fn cancel_one(dir: PathBuf, strategy_id: String) -> anyhow::Result<()> {
    let config = EngineConfig::conservative_defaults(&dir);
    let store = StrategyStore::new(&config.strategy_store_path);
    let order_audit = AuditWriter::new(&config.order_audit_path, true).context("open order audit log")?;
    let engine_audit = AuditWriter::new(&config.engine_audit_path, true).context("open engine audit log")?;

    let mut engine = Engine::new(
        HistoricalBroker::new(),
        store,
        order_audit,
        engine_audit,
        Uuid::new_v4(),
        config.initial_cash_micros,
        config.policy,
    );
    engine.cancel_strategy(&strategy_id, Utc::now()).context("cancel strategy")?;
    info!(strategy_id, "cancel requested");
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

//! lockstep-node — the cross-chain swap-coordinator daemon.
//!
//! Startup sequence:
//!   1. Load and validate configuration (invalid config exits 2)
//!   2. Open the swap store
//!   3. Build a chain adapter per ledger (JSON-RPC gateway, or the in-memory
//!      devnet ledger when no URL is configured)
//!   4. Register as resolver on both ledgers, rebuild timers, reconcile
//!   5. Run ingestors, engine workers, timer wheel, sweep, operator RPC
//!   6. On SIGINT/SIGTERM: drain, checkpoint, exit 130

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use lockstep_chain::{ChainAdapter, MemoryChain, RpcChain};
use lockstep_core::config::Config;
use lockstep_core::types::{Clock, LedgerId, SystemClock};
use lockstep_node::Coordinator;
use lockstep_store::SwapStore;

#[derive(Parser, Debug)]
#[command(
    name = "lockstep-node",
    version,
    about = "Lockstep — HTLC atomic-swap coordinator between two ledgers"
)]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "lockstep.json")]
    config: PathBuf,

    /// Override the store path from the config file.
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Override the operator RPC listen address.
    #[arg(long)]
    rpc_addr: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lockstep=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            // Configuration problems go to stdout for the operator, then
            // exit 2 — distinct from runtime failures.
            println!("configuration invalid: {e}");
            std::process::exit(2);
        }
    };
    if let Some(store_path) = args.store_path {
        config.store_path = store_path;
    }
    if let Some(rpc_addr) = args.rpc_addr {
        config.rpc_listen = rpc_addr;
    }
    if let Err(e) = config.validate() {
        println!("configuration invalid: {e}");
        std::process::exit(2);
    }

    match run(config).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config) -> anyhow::Result<i32> {
    info!(network = %config.network, "lockstep node starting");

    std::fs::create_dir_all(&config.store_path)
        .with_context(|| format!("creating store dir {}", config.store_path.display()))?;
    let store = Arc::new(SwapStore::open(&config.store_path).context("opening swap store")?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let chain_a = build_adapter(LedgerId::A, &config, &clock);
    let chain_b = build_adapter(LedgerId::B, &config, &clock);

    let mut coordinator =
        Coordinator::new(config, store, clock, chain_a, chain_b).context("building coordinator")?;
    coordinator.start().await.context("starting coordinator")?;
    info!("lockstep ready");

    wait_for_shutdown().await;
    coordinator.stop().await;
    Ok(130)
}

fn build_adapter(ledger: LedgerId, config: &Config, clock: &Arc<dyn Clock>) -> Arc<dyn ChainAdapter> {
    let lc = config.ledger(ledger);
    if lc.rpc_url.is_empty() {
        info!(%ledger, "no gateway URL configured; using in-memory devnet ledger");
        Arc::new(MemoryChain::new(
            ledger,
            lc.finality_depth,
            lc.local_address.clone(),
            Arc::clone(clock),
        ))
    } else {
        Arc::new(RpcChain::new(
            ledger,
            lc.rpc_url.clone(),
            lc.local_address.clone(),
            lc.key_ref.clone(),
            lc.finality_depth,
        ))
    }
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!(error = %e, "SIGTERM handler unavailable; SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = term.recv() => info!("terminate received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
    info!("interrupt received");
}

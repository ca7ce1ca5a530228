use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use jsonrpsee::server::ServerHandle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use lockstep_chain::ChainAdapter;
use lockstep_core::config::Config;
use lockstep_core::constants::TIMER_RESOLUTION_MS;
use lockstep_core::error::LockstepError;
use lockstep_core::swap::{SignalReason, SwapSignal};
use lockstep_core::types::{Clock, LedgerId};
use lockstep_engine::{
    spawn_workers, EnginePolicy, KeyedLocks, RateLimiter, SwapEngine, TimerWheel,
};
use lockstep_ingest::{Correlator, IngestStatus, Ingestor};
use lockstep_rpc::{RpcServer, RpcServerState};
use lockstep_store::SwapStore;

/// Process control plane: owns every long-lived task (ingestors, engine
/// workers, timer wheel, retention sweep, operator RPC) and the shutdown
/// signal that drains them.
///
/// Startup order matters: resolver registration and timer rebuild complete
/// before the first event is ingested, and the startup reconcile pass
/// re-evaluates every non-terminal swap so signals lost in a crash are
/// recovered from durable state.
pub struct Coordinator {
    config: Config,
    store: Arc<SwapStore>,
    clock: Arc<dyn Clock>,
    chain_a: Arc<dyn ChainAdapter>,
    chain_b: Arc<dyn ChainAdapter>,
    engine: Arc<SwapEngine>,
    locks: Arc<KeyedLocks>,
    timers: Arc<TimerWheel>,
    status_a: Arc<IngestStatus>,
    status_b: Arc<IngestStatus>,
    signals_tx: mpsc::Sender<SwapSignal>,
    signals_rx: Option<mpsc::Receiver<SwapSignal>>,
    ingestor_a: Option<Ingestor>,
    ingestor_b: Option<Ingestor>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: JoinSet<()>,
    workers: Option<JoinSet<()>>,
    rpc_handle: Option<ServerHandle>,
}

impl Coordinator {
    pub fn new(
        config: Config,
        store: Arc<SwapStore>,
        clock: Arc<dyn Clock>,
        chain_a: Arc<dyn ChainAdapter>,
        chain_b: Arc<dyn ChainAdapter>,
    ) -> Result<Self, LockstepError> {
        let (signals_tx, signals_rx) = mpsc::channel(1_024);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let timers = Arc::new(TimerWheel::new(TIMER_RESOLUTION_MS as u64));

        let engine = Arc::new(SwapEngine::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&chain_a),
            Arc::clone(&chain_b),
            RateLimiter::new(config.ledger_a.rate_limit_rps),
            RateLimiter::new(config.ledger_b.rate_limit_rps),
            Arc::clone(&timers),
            EnginePolicy::from_config(&config),
        ));
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            signals_tx.clone(),
        ));
        let ingestor_a = Ingestor::new(
            Arc::clone(&chain_a),
            Arc::clone(&store),
            Arc::clone(&correlator),
            config.ledger_a.poll_interval_ms,
            config.event_batch,
        );
        let ingestor_b = Ingestor::new(
            Arc::clone(&chain_b),
            Arc::clone(&store),
            Arc::clone(&correlator),
            config.ledger_b.poll_interval_ms,
            config.event_batch,
        );
        let status_a = ingestor_a.status();
        let status_b = ingestor_b.status();

        Ok(Self {
            config,
            store,
            clock,
            chain_a,
            chain_b,
            engine,
            locks: Arc::new(KeyedLocks::new()),
            timers,
            status_a,
            status_b,
            signals_tx,
            signals_rx: Some(signals_rx),
            ingestor_a: Some(ingestor_a),
            ingestor_b: Some(ingestor_b),
            shutdown_tx,
            shutdown_rx,
            tasks: JoinSet::new(),
            workers: None,
            rpc_handle: None,
        })
    }

    pub fn store(&self) -> Arc<SwapStore> {
        Arc::clone(&self.store)
    }

    pub fn engine(&self) -> Arc<SwapEngine> {
        Arc::clone(&self.engine)
    }

    pub fn status(&self, ledger: LedgerId) -> Arc<IngestStatus> {
        match ledger {
            LedgerId::A => Arc::clone(&self.status_a),
            LedgerId::B => Arc::clone(&self.status_b),
        }
    }

    /// Bring the coordinator up. Failing anything here is an init failure
    /// (exit code 1 at the binary level).
    pub async fn start(&mut self) -> anyhow::Result<()> {
        // Stake and register on both ledgers before touching any swap.
        self.chain_a
            .register_resolver(self.config.ledger_a.resolver_stake)
            .await
            .context("registering as resolver on ledger A")?;
        self.chain_b
            .register_resolver(self.config.ledger_b.resolver_stake)
            .await
            .context("registering as resolver on ledger B")?;

        let armed = self.timers.rebuild(&self.store).context("rebuilding timers")?;
        info!(armed, "timer wheel rebuilt from store");

        // Re-evaluate everything non-terminal: crash recovery for signals
        // that never made it to a worker.
        let active = self.store.active_swaps().context("startup swap scan")?;
        info!(count = active.len(), "startup reconcile");
        for swap in active {
            let _ = self
                .signals_tx
                .send(SwapSignal { swap_id: swap.swap_id, reason: SignalReason::Reconcile })
                .await;
        }

        let signals_rx = self.signals_rx.take().expect("coordinator started twice");
        self.workers = Some(spawn_workers(
            self.config.worker_count,
            Arc::clone(&self.engine),
            Arc::clone(&self.locks),
            signals_rx,
            self.shutdown_rx.clone(),
        ));

        self.tasks.spawn(Arc::clone(&self.timers).run(
            Arc::clone(&self.clock),
            self.signals_tx.clone(),
            self.shutdown_rx.clone(),
        ));
        self.tasks
            .spawn(self.ingestor_a.take().expect("coordinator started twice").run(self.shutdown_rx.clone()));
        self.tasks
            .spawn(self.ingestor_b.take().expect("coordinator started twice").run(self.shutdown_rx.clone()));
        self.tasks.spawn(sweep_loop(
            Arc::clone(&self.engine),
            Arc::clone(&self.locks),
            self.config.retention_ms,
            self.shutdown_rx.clone(),
        ));

        let addr: SocketAddr = self
            .config
            .rpc_listen
            .parse()
            .with_context(|| format!("parsing rpc_listen {}", self.config.rpc_listen))?;
        let state = Arc::new(RpcServerState {
            store: Arc::clone(&self.store),
            engine: Arc::clone(&self.engine),
            status_a: Arc::clone(&self.status_a),
            status_b: Arc::clone(&self.status_b),
            network: self.config.network.to_string(),
            fee_bps: self.config.fee_bps,
        });
        self.rpc_handle = Some(
            RpcServer::new(state)
                .start(addr)
                .await
                .context("starting operator RPC")?,
        );

        info!(network = %self.config.network, "coordinator started");
        Ok(())
    }

    /// Graceful stop: flip the shutdown signal, let in-flight actions finish
    /// at their next suspension point, then checkpoint the store.
    pub async fn stop(&mut self) {
        info!("coordinator stopping");
        let _ = self.shutdown_tx.send(true);
        while self.tasks.join_next().await.is_some() {}
        if let Some(mut workers) = self.workers.take() {
            while workers.join_next().await.is_some() {}
        }
        if let Some(handle) = self.rpc_handle.take() {
            let _ = handle.stop();
        }
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "final store flush failed");
        }
        info!("coordinator stopped");
    }
}

/// Periodic retention sweep: purge terminal swaps past the retention window
/// and prune idle per-swap locks.
async fn sweep_loop(
    engine: Arc<SwapEngine>,
    locks: Arc<KeyedLocks>,
    retention_ms: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = Duration::from_millis((retention_ms.max(0) as u64 / 4).clamp(1_000, 60_000));
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
        match engine.sweep_retention() {
            Ok(0) => {}
            Ok(purged) => info!(purged, "retention sweep"),
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }
        locks.prune();
    }
    info!("retention sweep stopped");
}

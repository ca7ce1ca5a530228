use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info};

use lockstep_core::swap::SwapSignal;

use crate::engine::SwapEngine;
use crate::scheduler::KeyedLocks;

/// Spawn the bounded worker pool. Workers pull signals off the shared
/// channel, take the swap's keyed lock, and run the engine; concurrency
/// across distinct swaps is bounded only by `count`. On shutdown the
/// in-flight evaluation finishes (its on-chain submits are idempotent);
/// queued signals are dropped and recovered by the next startup scan.
pub fn spawn_workers(
    count: usize,
    engine: Arc<SwapEngine>,
    locks: Arc<KeyedLocks>,
    signals: mpsc::Receiver<SwapSignal>,
    shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let signals = Arc::new(Mutex::new(signals));
    let mut set = JoinSet::new();
    for worker in 0..count.max(1) {
        let engine = Arc::clone(&engine);
        let locks = Arc::clone(&locks);
        let signals = Arc::clone(&signals);
        let mut shutdown = shutdown.clone();
        set.spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let signal = {
                    let mut rx = signals.lock().await;
                    tokio::select! {
                        s = rx.recv() => s,
                        _ = shutdown.changed() => continue,
                    }
                };
                let Some(signal) = signal else { break };
                debug!(worker, swap_id = %signal.swap_id, reason = %signal.reason, "evaluating");
                let _guard = locks.acquire(&signal.swap_id).await;
                engine.evaluate(signal.swap_id).await;
            }
            info!(worker, "engine worker stopped");
        });
    }
    set
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use lockstep_chain::{ChainAdapter, ChainError};
use lockstep_core::types::LedgerId;
use lockstep_store::SwapStore;

use crate::correlator::Correlator;

/// Live counters exposed through the health probe.
#[derive(Default)]
pub struct IngestStatus {
    pub connected: AtomicBool,
    pub head_height: AtomicU64,
    pub cursor_height: AtomicU64,
    pub events_ingested: AtomicU64,
    pub cursor_rewinds: AtomicU64,
}

impl IngestStatus {
    /// How far the cursor trails the ledger head, in heights.
    pub fn lag(&self) -> u64 {
        self.head_height
            .load(Ordering::Relaxed)
            .saturating_sub(self.cursor_height.load(Ordering::Relaxed))
    }
}

/// Per-ledger long-lived subscriber: polls finalized events in bounded
/// batches, hands each to the correlator (which persists it atomically with
/// the cursor advance), and rewinds on a reorg past the finality depth.
pub struct Ingestor {
    ledger: LedgerId,
    adapter: Arc<dyn ChainAdapter>,
    store: Arc<SwapStore>,
    correlator: Arc<Correlator>,
    poll_interval: Duration,
    batch: usize,
    status: Arc<IngestStatus>,
}

impl Ingestor {
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        store: Arc<SwapStore>,
        correlator: Arc<Correlator>,
        poll_interval_ms: u64,
        batch: usize,
    ) -> Self {
        Self {
            ledger: adapter.ledger(),
            adapter,
            store,
            correlator,
            poll_interval: Duration::from_millis(poll_interval_ms),
            batch,
            status: Arc::new(IngestStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<IngestStatus> {
        Arc::clone(&self.status)
    }

    /// Poll-and-apply loop until shutdown flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(ledger = %self.ledger, "ingestor started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.poll_once().await;
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!(ledger = %self.ledger, "ingestor stopped");
    }

    /// One poll cycle. Public so devnet tooling and tests can drive ingestion
    /// deterministically without the timer loop.
    pub async fn poll_once(&self) {
        let from = match self.store.cursor(self.ledger) {
            Ok(cursor) => cursor,
            Err(e) => {
                warn!(ledger = %self.ledger, error = %e, "cursor read failed");
                return;
            }
        };

        match self.adapter.poll_events(from, self.batch).await {
            Ok(batch) => {
                self.status.connected.store(true, Ordering::Relaxed);
                self.status.head_height.store(batch.head_height, Ordering::Relaxed);

                let mut all_applied = true;
                for event in &batch.events {
                    debug!(
                        ledger = %self.ledger,
                        kind = event.kind(),
                        height = event.height,
                        escrow_id = %event.escrow_id(),
                        "event"
                    );
                    if let Err(e) = self.correlator.apply_event(event).await {
                        warn!(ledger = %self.ledger, error = %e, "event apply failed; halting batch");
                        all_applied = false;
                        break;
                    }
                    self.status.events_ingested.fetch_add(1, Ordering::Relaxed);
                }

                // Fast-forward over empty finalized space only when nothing
                // in the batch is pending a retry.
                if all_applied {
                    match self.store.cursor(self.ledger) {
                        Ok(current) if batch.cursor > current => {
                            if let Err(e) = self.store.put_cursor(self.ledger, batch.cursor) {
                                warn!(ledger = %self.ledger, error = %e, "cursor fast-forward failed");
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!(ledger = %self.ledger, error = %e, "cursor read failed"),
                    }
                }
                if let Ok(cursor) = self.store.cursor(self.ledger) {
                    self.status.cursor_height.store(cursor.height, Ordering::Relaxed);
                }
            }
            Err(ChainError::CursorGap { rewind_to }) => {
                self.status.cursor_rewinds.fetch_add(1, Ordering::Relaxed);
                warn!(ledger = %self.ledger, rewind_to = %rewind_to, "reorg past finality; rewinding");
                match self.store.rewind(self.ledger, rewind_to) {
                    Ok(removed) => {
                        if let Err(e) = self.correlator.handle_rewind(&removed).await {
                            warn!(ledger = %self.ledger, error = %e, "rewind reconciliation failed");
                        }
                    }
                    Err(e) => warn!(ledger = %self.ledger, error = %e, "store rewind failed"),
                }
            }
            Err(e) => {
                self.status.connected.store(false, Ordering::Relaxed);
                warn!(ledger = %self.ledger, error = %e, code = e.code(), "event poll failed");
            }
        }
    }
}

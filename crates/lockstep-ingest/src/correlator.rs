use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use lockstep_core::constants::MAX_CONFLICT_RETRIES;
use lockstep_core::error::LockstepError;
use lockstep_core::escrow::Escrow;
use lockstep_core::event::{ChainEvent, EscrowEvent};
use lockstep_core::swap::{Reveal, SignalReason, Swap, SwapPhase, SwapSide, SwapSignal};
use lockstep_core::types::{Clock, Digest, EscrowId, Secret, SwapId};
use lockstep_crypto::swap_id_for;
use lockstep_store::SwapStore;

/// Joins escrow events from both ledgers by their shared hashlock digest and
/// keeps the swap records current.
///
/// The correlator only records facts — sides attached, secrets revealed,
/// escrows refunded — and signals the engine. Phase progression, policy
/// checks and on-chain reactions are the engine's business.
pub struct Correlator {
    store: Arc<SwapStore>,
    clock: Arc<dyn Clock>,
    signals: mpsc::Sender<SwapSignal>,
}

impl Correlator {
    pub fn new(
        store: Arc<SwapStore>,
        clock: Arc<dyn Clock>,
        signals: mpsc::Sender<SwapSignal>,
    ) -> Self {
        Self { store, clock, signals }
    }

    /// Apply one canonical event. Idempotent: duplicates keyed by
    /// `(ledger, tx_ref, index)` are dropped here. A concurrent writer on the
    /// same swap causes a reload-and-re-decide, bounded by
    /// `MAX_CONFLICT_RETRIES`.
    pub async fn apply_event(&self, event: &ChainEvent) -> Result<(), LockstepError> {
        if self.store.seen_event(event)? {
            debug!(ledger = %event.ledger, tx_ref = %event.tx_ref, "duplicate event dropped");
            return Ok(());
        }

        let mut attempts = 0;
        let touched = loop {
            match self.try_apply(event) {
                Ok(touched) => break touched,
                Err(e @ LockstepError::VersionConflict { .. }) => {
                    attempts += 1;
                    if attempts > MAX_CONFLICT_RETRIES {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(swap_id) = touched {
            // Persisted first; a lost signal is recovered by the startup scan.
            if self
                .signals
                .send(SwapSignal { swap_id, reason: SignalReason::Event })
                .await
                .is_err()
            {
                warn!(swap_id = %swap_id, "engine channel closed; signal dropped");
            }
        }
        Ok(())
    }

    fn try_apply(&self, event: &ChainEvent) -> Result<Option<SwapId>, LockstepError> {
        match &event.body {
            EscrowEvent::Created { escrow } => self.apply_created(event, escrow),
            EscrowEvent::Withdrawn { escrow_id, digest, secret, .. } => {
                self.apply_withdrawn(event, escrow_id, digest, secret)
            }
            EscrowEvent::Refunded { escrow_id, digest, .. } => {
                self.apply_refunded(event, escrow_id, digest)
            }
        }
    }

    // ── EscrowCreated ────────────────────────────────────────────────────────

    fn apply_created(
        &self,
        event: &ChainEvent,
        escrow: &Escrow,
    ) -> Result<Option<SwapId>, LockstepError> {
        let now = self.clock.now_ms();
        let mut swap = match self.store.swap_by_digest(&escrow.digest)? {
            Some(swap) => swap,
            None => {
                let swap_id = swap_id_for(&escrow.digest, escrow.algo);
                Swap::new(swap_id, escrow.digest, escrow.algo, now)
            }
        };
        let expected = Some(swap.version);

        let ledger = escrow.escrow_id.ledger;
        match swap.side(ledger) {
            None => {
                swap.set_side(ledger, SwapSide::new(escrow.escrow_id.clone()));
                swap.set_deadline(ledger, escrow.deadline_ms());
            }
            Some(side) if side.escrow_id == escrow.escrow_id => {
                // Re-announcement of a known escrow: refresh the snapshot only.
            }
            Some(side) => {
                warn!(
                    swap_id = %swap.swap_id,
                    digest = %escrow.digest,
                    known = %side.escrow_id,
                    extra = %escrow.escrow_id,
                    "ambiguous pairing: extra escrow shares the digest"
                );
                swap.ambiguous = true;
            }
        }
        swap.touch(now);

        self.store.atomic_apply(event, &mut swap, expected, Some(escrow), None)?;
        Ok(Some(swap.swap_id))
    }

    // ── EscrowWithdrawn ──────────────────────────────────────────────────────

    fn apply_withdrawn(
        &self,
        event: &ChainEvent,
        escrow_id: &EscrowId,
        digest: &Digest,
        secret: &Secret,
    ) -> Result<Option<SwapId>, LockstepError> {
        let now = self.clock.now_ms();
        let Some(mut swap) = self.store.swap_by_digest(digest)? else {
            warn!(escrow_id = %escrow_id, "withdrawal for unknown digest; recorded as orphan");
            self.store.record_event_only(event)?;
            return Ok(None);
        };
        let expected = Some(swap.version);

        let escrow_update = match self.store.get_escrow(escrow_id)? {
            Some(mut escrow) => {
                if let Err(e) = escrow.mark_withdrawn(secret.clone()) {
                    warn!(escrow_id = %escrow_id, error = %e, "ledger contradicts stored escrow state");
                }
                Some(escrow)
            }
            None => None,
        };

        // The reveal is recorded even when the withdrawing escrow is not one
        // of the paired sides: the preimage is what matters.
        let reveal = Reveal {
            swap_id: swap.swap_id,
            digest: *digest,
            secret: secret.clone(),
            source_ledger: event.ledger,
            source_tx_ref: event.tx_ref.clone(),
            observed_ms: now,
        };
        swap.touch(now);

        self.store
            .atomic_apply(event, &mut swap, expected, escrow_update.as_ref(), Some(&reveal))?;
        Ok(Some(swap.swap_id))
    }

    // ── EscrowRefunded ───────────────────────────────────────────────────────

    fn apply_refunded(
        &self,
        event: &ChainEvent,
        escrow_id: &EscrowId,
        digest: &Digest,
    ) -> Result<Option<SwapId>, LockstepError> {
        let now = self.clock.now_ms();
        let Some(mut swap) = self.store.swap_by_digest(digest)? else {
            warn!(escrow_id = %escrow_id, "refund for unknown digest; recorded as orphan");
            self.store.record_event_only(event)?;
            return Ok(None);
        };
        let expected = Some(swap.version);

        let escrow_update = match self.store.get_escrow(escrow_id)? {
            Some(mut escrow) => {
                if let Err(e) = escrow.mark_refunded() {
                    warn!(escrow_id = %escrow_id, error = %e, "ledger contradicts stored escrow state");
                }
                Some(escrow)
            }
            None => None,
        };
        swap.touch(now);

        self.store.atomic_apply(event, &mut swap, expected, escrow_update.as_ref(), None)?;
        Ok(Some(swap.swap_id))
    }

    // ── Reorg reconciliation ─────────────────────────────────────────────────

    /// Undo the swap-level effects of events wiped by a deep reorg, newest
    /// first. Event-born swaps that lose their last side are deleted;
    /// operator-created swaps fall back to `Pending`; a paired swap that
    /// loses one side is demoted to `OneSideLocked`.
    pub async fn handle_rewind(&self, removed: &[ChainEvent]) -> Result<(), LockstepError> {
        let mut touched = Vec::new();
        for event in removed.iter().rev() {
            let swap_id = match &event.body {
                EscrowEvent::Created { escrow } => self.rewind_created(escrow)?,
                EscrowEvent::Withdrawn { escrow_id, digest, .. } => {
                    self.rewind_withdrawn(event, escrow_id, digest)?
                }
                EscrowEvent::Refunded { escrow_id, digest, .. } => {
                    self.rewind_refunded(escrow_id, digest)?
                }
            };
            if let Some(id) = swap_id {
                if !touched.contains(&id) {
                    touched.push(id);
                }
            }
        }
        for swap_id in touched {
            let _ = self
                .signals
                .send(SwapSignal { swap_id, reason: SignalReason::Reconcile })
                .await;
        }
        Ok(())
    }

    fn rewind_created(&self, escrow: &Escrow) -> Result<Option<SwapId>, LockstepError> {
        let Some(mut swap) = self.store.swap_by_digest(&escrow.digest)? else {
            return Ok(None);
        };
        if swap.is_terminal() {
            warn!(swap_id = %swap.swap_id, "creation wiped under a terminal swap; leaving it");
            return Ok(None);
        }
        let ledger = escrow.escrow_id.ledger;
        let matches = swap
            .side(ledger)
            .map(|side| side.escrow_id == escrow.escrow_id)
            .unwrap_or(false);
        if !matches {
            return Ok(None);
        }

        swap.clear_side(ledger);
        self.store.delete_escrow(&escrow.escrow_id)?;
        swap.touch(self.clock.now_ms());

        match swap.sides_count() {
            0 if !swap.operator_created => {
                debug!(swap_id = %swap.swap_id, "event-born swap lost its only side; deleting");
                self.store.purge_swap(&swap.swap_id)?;
                Ok(None)
            }
            0 => {
                swap.phase = SwapPhase::Pending;
                self.store.upsert_swap(&mut swap, None)?;
                Ok(Some(swap.swap_id))
            }
            _ => {
                swap.phase = SwapPhase::OneSideLocked;
                self.store.upsert_swap(&mut swap, None)?;
                Ok(Some(swap.swap_id))
            }
        }
    }

    fn rewind_withdrawn(
        &self,
        event: &ChainEvent,
        escrow_id: &EscrowId,
        digest: &Digest,
    ) -> Result<Option<SwapId>, LockstepError> {
        let Some(mut swap) = self.store.swap_by_digest(digest)? else {
            return Ok(None);
        };
        if let Some(mut escrow) = self.store.get_escrow(escrow_id)? {
            escrow.withdrawn = false;
            escrow.revealed_secret = None;
            self.store.put_escrow(&escrow)?;
        }
        if let Some(reveal) = self.store.get_reveal(&swap.swap_id)? {
            if reveal.source_tx_ref == event.tx_ref {
                self.store.delete_reveal(&swap.swap_id)?;
            }
        }
        if swap.phase == SwapPhase::Revealed {
            swap.phase = SwapPhase::BothLocked;
            swap.touch(self.clock.now_ms());
            self.store.upsert_swap(&mut swap, None)?;
        }
        Ok(Some(swap.swap_id))
    }

    fn rewind_refunded(
        &self,
        escrow_id: &EscrowId,
        digest: &Digest,
    ) -> Result<Option<SwapId>, LockstepError> {
        let Some(swap) = self.store.swap_by_digest(digest)? else {
            return Ok(None);
        };
        if let Some(mut escrow) = self.store.get_escrow(escrow_id)? {
            escrow.refunded = false;
            self.store.put_escrow(&escrow)?;
        }
        Ok(Some(swap.swap_id))
    }
}

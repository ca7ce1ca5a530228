use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use lockstep_core::escrow::Escrow;
use lockstep_core::event::{ChainEvent, EscrowEvent};
use lockstep_core::types::{Amount, Clock, Cursor, Digest, EscrowId, LedgerId, Secret, TxRef};

use crate::adapter::{ChainAdapter, CreateEscrowParams, EventBatch, Receipt};
use crate::error::ChainError;

/// Deterministic in-memory ledger.
///
/// Implements the full adapter contract against a manually-driven clock and
/// block height, so the engine and ingestor are unit-testable without any
/// network. Also serves as the devnet adapter when a ledger has no gateway
/// URL configured. Extra non-trait methods let tests act as third parties
/// (create/withdraw/refund under any address), advance time and height,
/// inject faults, and force a reorg.
pub struct MemoryChain {
    ledger: LedgerId,
    finality_depth: u64,
    local_address: String,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

struct Inner {
    height: u64,
    next_escrow_seq: u64,
    next_tx_seq: u64,
    escrows: HashMap<String, Escrow>,
    log: Vec<ChainEvent>,
    /// After a forced reorg: heights above this were wiped; a cursor past it
    /// is a gap.
    pruned_above: Option<u64>,
    resolvers: HashMap<String, Amount>,
    registrations: u32,
    fail_next_create: Option<ChainError>,
    fail_next_withdraw: Option<ChainError>,
    fail_next_refund: Option<ChainError>,
    unavailable: bool,
}

impl MemoryChain {
    pub fn new(
        ledger: LedgerId,
        finality_depth: u64,
        local_address: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            finality_depth: finality_depth.max(1),
            local_address: local_address.into(),
            clock,
            inner: Mutex::new(Inner {
                height: 0,
                next_escrow_seq: 0,
                next_tx_seq: 0,
                escrows: HashMap::new(),
                log: Vec::new(),
                pruned_above: None,
                resolvers: HashMap::new(),
                registrations: 0,
                fail_next_create: None,
                fail_next_withdraw: None,
                fail_next_refund: None,
                unavailable: false,
            }),
        }
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    // ── Height control ───────────────────────────────────────────────────────

    /// Mine `n` empty blocks so pending events cross the finality depth.
    pub fn advance_blocks(&self, n: u64) {
        self.inner.lock().unwrap().height += n;
    }

    /// Wipe everything above `height`, reverting the wiped events' effects.
    /// Subsequent polls from a cursor past `height` report a gap.
    pub fn reorg_to(&self, height: u64) {
        let mut inner = self.inner.lock().unwrap();
        let wiped: Vec<ChainEvent> =
            inner.log.iter().filter(|ev| ev.height > height).cloned().collect();
        for ev in wiped.iter().rev() {
            match &ev.body {
                EscrowEvent::Created { escrow } => {
                    inner.escrows.remove(&escrow.escrow_id.id);
                }
                EscrowEvent::Withdrawn { escrow_id, .. } => {
                    if let Some(e) = inner.escrows.get_mut(&escrow_id.id) {
                        e.withdrawn = false;
                        e.revealed_secret = None;
                    }
                }
                EscrowEvent::Refunded { escrow_id, .. } => {
                    if let Some(e) = inner.escrows.get_mut(&escrow_id.id) {
                        e.refunded = false;
                    }
                }
            }
        }
        inner.log.retain(|ev| ev.height <= height);
        inner.height = height;
        inner.pruned_above = Some(height);
    }

    // ── Fault injection ──────────────────────────────────────────────────────

    pub fn inject_create_error(&self, err: ChainError) {
        self.inner.lock().unwrap().fail_next_create = Some(err);
    }

    pub fn inject_withdraw_error(&self, err: ChainError) {
        self.inner.lock().unwrap().fail_next_withdraw = Some(err);
    }

    pub fn inject_refund_error(&self, err: ChainError) {
        self.inner.lock().unwrap().fail_next_refund = Some(err);
    }

    pub fn set_unavailable(&self, down: bool) {
        self.inner.lock().unwrap().unavailable = down;
    }

    pub fn registration_count(&self) -> u32 {
        self.inner.lock().unwrap().registrations
    }

    /// Raw escrow snapshot without the adapter error mapping.
    pub fn escrow_snapshot(&self, escrow_id: &EscrowId) -> Option<Escrow> {
        self.inner.lock().unwrap().escrows.get(&escrow_id.id).cloned()
    }

    // ── Acting as arbitrary parties (tests, devnet seeding) ──────────────────

    pub fn create_escrow_as(
        &self,
        owner: &str,
        params: CreateEscrowParams,
    ) -> Result<(EscrowId, TxRef), ChainError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.fail_next_create.take() {
            return Err(err);
        }
        if params.amount == 0 {
            return Err(ChainError::Rejected("zero amount".into()));
        }
        if params.beneficiary.is_empty() {
            return Err(ChainError::Rejected("empty beneficiary".into()));
        }

        let start_ms = self.clock.now_ms();
        inner.next_escrow_seq += 1;
        let id = match self.ledger {
            LedgerId::A => format!("0xe5c{:04x}", inner.next_escrow_seq),
            LedgerId::B => format!("obj-{}", inner.next_escrow_seq),
        };
        let escrow_id = EscrowId::new(self.ledger, id);
        let escrow = Escrow {
            escrow_id: escrow_id.clone(),
            owner: owner.to_string(),
            beneficiary: params.beneficiary,
            token: params.token,
            amount: params.amount,
            digest: params.digest,
            algo: params.algo,
            start_ms,
            lock_duration_ms: params.lock_duration_ms,
            withdrawn: false,
            refunded: false,
            revealed_secret: None,
        };
        inner.escrows.insert(escrow_id.id.clone(), escrow.clone());
        let tx_ref = self.emit(&mut inner, EscrowEvent::Created { escrow });
        Ok((escrow_id, tx_ref))
    }

    pub fn withdraw_as(
        &self,
        caller: &str,
        escrow_id: &EscrowId,
        secret: &Secret,
    ) -> Result<TxRef, ChainError> {
        self.withdraw_inner(caller, escrow_id, secret, true)
    }

    /// Withdraw without the hashlock check — simulates a gateway or contract
    /// that released funds against a preimage the coordinator's policy would
    /// reject. The emitted event still carries the offending secret.
    pub fn withdraw_unchecked_as(
        &self,
        caller: &str,
        escrow_id: &EscrowId,
        secret: &Secret,
    ) -> Result<TxRef, ChainError> {
        self.withdraw_inner(caller, escrow_id, secret, false)
    }

    fn withdraw_inner(
        &self,
        caller: &str,
        escrow_id: &EscrowId,
        secret: &Secret,
        check_secret: bool,
    ) -> Result<TxRef, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(ChainError::Unavailable("injected outage".into()));
        }
        if let Some(err) = inner.fail_next_withdraw.take() {
            return Err(err);
        }
        let now = self.clock.now_ms();
        let escrow = inner
            .escrows
            .get(&escrow_id.id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(escrow_id.to_string()))?;
        if escrow.withdrawn {
            return Err(ChainError::AlreadyProcessed);
        }
        if escrow.refunded || now > escrow.deadline_ms() {
            return Err(ChainError::Expired);
        }
        if check_secret && !lockstep_crypto::verify(secret, &escrow.digest, escrow.algo) {
            return Err(ChainError::InvalidSecret);
        }

        let digest = escrow.digest;
        {
            let e = inner.escrows.get_mut(&escrow_id.id).unwrap();
            e.withdrawn = true;
            e.revealed_secret = Some(secret.clone());
        }
        let tx_ref = self.emit(
            &mut inner,
            EscrowEvent::Withdrawn {
                escrow_id: escrow_id.clone(),
                digest,
                secret: secret.clone(),
                by: caller.to_string(),
            },
        );
        Ok(tx_ref)
    }

    pub fn refund_as(&self, caller: &str, escrow_id: &EscrowId) -> Result<TxRef, ChainError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(ChainError::Unavailable("injected outage".into()));
        }
        if let Some(err) = inner.fail_next_refund.take() {
            return Err(err);
        }
        let now = self.clock.now_ms();
        let escrow = inner
            .escrows
            .get(&escrow_id.id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(escrow_id.to_string()))?;
        if caller != escrow.owner {
            return Err(ChainError::Unauthorized);
        }
        if escrow.is_terminal() {
            return Err(ChainError::AlreadyProcessed);
        }
        if now <= escrow.deadline_ms() {
            return Err(ChainError::NotExpired);
        }

        let digest = escrow.digest;
        inner.escrows.get_mut(&escrow_id.id).unwrap().refunded = true;
        let tx_ref = self.emit(
            &mut inner,
            EscrowEvent::Refunded {
                escrow_id: escrow_id.clone(),
                digest,
                by: caller.to_string(),
            },
        );
        Ok(tx_ref)
    }

    /// Append an event in its own block, like a one-tx-per-block devnet.
    fn emit(&self, inner: &mut Inner, body: EscrowEvent) -> TxRef {
        inner.height += 1;
        inner.next_tx_seq += 1;
        let tx_ref = TxRef::new(format!("{}tx{:06}", self.ledger, inner.next_tx_seq));
        inner.log.push(ChainEvent {
            ledger: self.ledger,
            height: inner.height,
            index: 0,
            tx_ref: tx_ref.clone(),
            body,
        });
        tx_ref
    }

    /// Highest height whose events are final given the current head.
    fn final_cutoff(head: u64, depth: u64) -> u64 {
        (head + 1).saturating_sub(depth)
    }
}

#[async_trait]
impl ChainAdapter for MemoryChain {
    fn ledger(&self) -> LedgerId {
        self.ledger
    }

    async fn create_escrow(&self, params: CreateEscrowParams) -> Result<(EscrowId, TxRef), ChainError> {
        let local = self.local_address.clone();
        self.create_escrow_as(&local, params)
    }

    async fn withdraw(&self, escrow_id: &EscrowId, secret: &Secret) -> Result<TxRef, ChainError> {
        let local = self.local_address.clone();
        self.withdraw_as(&local, escrow_id, secret)
    }

    async fn refund(&self, escrow_id: &EscrowId) -> Result<TxRef, ChainError> {
        let local = self.local_address.clone();
        self.refund_as(&local, escrow_id)
    }

    async fn get_escrow(&self, escrow_id: &EscrowId) -> Result<Escrow, ChainError> {
        let inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(ChainError::Unavailable("injected outage".into()));
        }
        inner
            .escrows
            .get(&escrow_id.id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(escrow_id.to_string()))
    }

    async fn find_escrows_by_digest(&self, digest: &Digest) -> Result<Vec<EscrowId>, ChainError> {
        let inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(ChainError::Unavailable("injected outage".into()));
        }
        let mut ids: Vec<EscrowId> = inner
            .escrows
            .values()
            .filter(|e| e.digest == *digest)
            .map(|e| e.escrow_id.clone())
            .collect();
        ids.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(ids)
    }

    async fn poll_events(&self, from: Cursor, limit: usize) -> Result<EventBatch, ChainError> {
        let inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(ChainError::Unavailable("injected outage".into()));
        }
        if let Some(pruned) = inner.pruned_above {
            if from > Cursor::end_of_height(pruned) {
                return Err(ChainError::CursorGap { rewind_to: Cursor::end_of_height(pruned) });
            }
        }

        let head = inner.height;
        let cutoff = Self::final_cutoff(head, self.finality_depth);
        let mut events: Vec<ChainEvent> = inner
            .log
            .iter()
            .filter(|ev| ev.cursor() > from && ev.height <= cutoff)
            .cloned()
            .collect();
        let truncated = events.len() > limit;
        events.truncate(limit);

        let cursor = if truncated {
            events.last().map(|ev| ev.cursor()).unwrap_or(from)
        } else {
            from.max(Cursor::end_of_height(cutoff))
        };
        Ok(EventBatch { events, cursor, head_height: head })
    }

    async fn submit_and_wait(&self, tx_ref: &TxRef) -> Result<Receipt, ChainError> {
        let inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(ChainError::Unavailable("injected outage".into()));
        }
        let ev = inner
            .log
            .iter()
            .find(|ev| ev.tx_ref == *tx_ref)
            .ok_or_else(|| ChainError::NotFound(tx_ref.to_string()))?;
        Ok(Receipt {
            tx_ref: tx_ref.clone(),
            height: ev.height,
            confirmations: inner.height - ev.height + 1,
        })
    }

    async fn head_height(&self) -> Result<u64, ChainError> {
        let inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(ChainError::Unavailable("injected outage".into()));
        }
        Ok(inner.height)
    }

    async fn register_resolver(&self, stake: Amount) -> Result<(), ChainError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(ChainError::Unavailable("injected outage".into()));
        }
        inner.registrations += 1;
        let local = self.local_address.clone();
        inner.resolvers.entry(local).or_insert(stake);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::types::{HashAlgo, ManualClock};
    use lockstep_crypto::{digest as hash_digest, random_secret};

    fn params(digest: Digest) -> CreateEscrowParams {
        CreateEscrowParams {
            token: "native".into(),
            amount: 1_000,
            digest,
            algo: HashAlgo::Sha256,
            beneficiary: "0xb0b".into(),
            lock_duration_ms: 60_000,
        }
    }

    fn chain() -> (MemoryChain, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (MemoryChain::new(LedgerId::A, 1, "0xc00rd", clock.clone()), clock)
    }

    #[tokio::test]
    async fn create_then_withdraw_round_trip() {
        let (c, _clock) = chain();
        let secret = random_secret();
        let d = hash_digest(&secret, HashAlgo::Sha256);
        let (id, _) = c.create_escrow_as("0xa11ce", params(d)).unwrap();

        // The registry index resolves the digest to the new escrow.
        assert_eq!(c.find_escrows_by_digest(&d).await.unwrap(), vec![id.clone()]);

        let tx = c.withdraw_as("0xb0b", &id, &secret).unwrap();
        let snap = c.escrow_snapshot(&id).unwrap();
        assert!(snap.withdrawn && !snap.refunded);

        let receipt = c.submit_and_wait(&tx).await.unwrap();
        assert_eq!(receipt.confirmations, 1);

        // Second withdrawal is idempotent at the adapter boundary.
        assert!(matches!(
            c.withdraw_as("0xb0b", &id, &secret),
            Err(ChainError::AlreadyProcessed)
        ));
    }

    #[tokio::test]
    async fn withdraw_enforces_hashlock_and_deadline() {
        let (c, clock) = chain();
        let secret = random_secret();
        let d = hash_digest(&secret, HashAlgo::Sha256);
        let (id, _) = c.create_escrow_as("0xa11ce", params(d)).unwrap();

        let wrong = random_secret();
        assert!(matches!(c.withdraw_as("0xb0b", &id, &wrong), Err(ChainError::InvalidSecret)));

        clock.set(1_000_000 + 60_001);
        assert!(matches!(c.withdraw_as("0xb0b", &id, &secret), Err(ChainError::Expired)));
    }

    #[tokio::test]
    async fn refund_requires_owner_and_expiry() {
        let (c, clock) = chain();
        let secret = random_secret();
        let d = hash_digest(&secret, HashAlgo::Sha256);
        let (id, _) = c.create_escrow_as("0xa11ce", params(d)).unwrap();

        assert!(matches!(c.refund_as("0xeve", &id), Err(ChainError::Unauthorized)));
        assert!(matches!(c.refund_as("0xa11ce", &id), Err(ChainError::NotExpired)));

        clock.set(1_000_000 + 60_001);
        c.refund_as("0xa11ce", &id).unwrap();
        assert!(c.escrow_snapshot(&id).unwrap().refunded);
        assert!(matches!(c.refund_as("0xa11ce", &id), Err(ChainError::AlreadyProcessed)));
    }

    #[tokio::test]
    async fn finality_depth_buffers_events() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let c = MemoryChain::new(LedgerId::A, 3, "0xc00rd", clock);
        let secret = random_secret();
        let d = hash_digest(&secret, HashAlgo::Sha256);
        c.create_escrow_as("0xa11ce", params(d)).unwrap();

        // One confirmation only: not final at depth 3.
        let batch = c.poll_events(Cursor::ZERO, 100).await.unwrap();
        assert!(batch.events.is_empty());

        c.advance_blocks(2);
        let batch = c.poll_events(Cursor::ZERO, 100).await.unwrap();
        assert_eq!(batch.events.len(), 1);
    }

    #[tokio::test]
    async fn poll_is_cursor_scoped_and_fast_forwards() {
        let (c, _clock) = chain();
        let secret = random_secret();
        let d = hash_digest(&secret, HashAlgo::Sha256);
        c.create_escrow_as("0xa11ce", params(d)).unwrap();

        let b1 = c.poll_events(Cursor::ZERO, 100).await.unwrap();
        assert_eq!(b1.events.len(), 1);
        let b2 = c.poll_events(b1.cursor, 100).await.unwrap();
        assert!(b2.events.is_empty());
        assert!(b2.cursor >= b1.cursor);
    }

    #[tokio::test]
    async fn reorg_reports_cursor_gap_and_reverts_state() {
        let (c, _clock) = chain();
        let secret = random_secret();
        let d = hash_digest(&secret, HashAlgo::Sha256);
        let (id, _) = c.create_escrow_as("0xa11ce", params(d)).unwrap();

        let batch = c.poll_events(Cursor::ZERO, 100).await.unwrap();
        assert_eq!(batch.events.len(), 1);

        c.reorg_to(0);
        assert!(c.escrow_snapshot(&id).is_none());
        match c.poll_events(batch.cursor, 100).await {
            Err(ChainError::CursorGap { rewind_to }) => assert_eq!(rewind_to.height, 0),
            other => panic!("expected CursorGap, got {other:?}"),
        }

        // After rewinding, polling resumes cleanly.
        let again = c.poll_events(Cursor::end_of_height(0), 100).await.unwrap();
        assert!(again.events.is_empty());
    }

    #[tokio::test]
    async fn resolver_registration_is_idempotent() {
        let (c, _clock) = chain();
        c.register_resolver(500).await.unwrap();
        c.register_resolver(500).await.unwrap();
        assert_eq!(c.registration_count(), 2);
        assert_eq!(c.inner.lock().unwrap().resolvers.len(), 1);
    }
}

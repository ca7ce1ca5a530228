use async_trait::async_trait;

use lockstep_core::escrow::Escrow;
use lockstep_core::event::ChainEvent;
use lockstep_core::types::{Amount, Cursor, Digest, EscrowId, HashAlgo, LedgerId, Secret, TxRef};

use crate::error::ChainError;

/// Parameters for locking a new escrow. The caller (this coordinator) is the
/// owner; the adapter signs as its configured local address via the opaque
/// key reference.
#[derive(Clone, Debug)]
pub struct CreateEscrowParams {
    pub token: String,
    pub amount: Amount,
    pub digest: Digest,
    pub algo: HashAlgo,
    pub beneficiary: String,
    pub lock_duration_ms: i64,
}

/// One bounded page of finalized events. `cursor` is the position up to
/// which the adapter has emitted everything it knows about — safe for the
/// caller to fast-forward to once all `events` are applied.
#[derive(Clone, Debug)]
pub struct EventBatch {
    pub events: Vec<ChainEvent>,
    pub cursor: Cursor,
    pub head_height: u64,
}

/// Finality receipt for a submitted transaction.
#[derive(Clone, Debug)]
pub struct Receipt {
    pub tx_ref: TxRef,
    pub height: u64,
    pub confirmations: u64,
}

/// Uniform capability surface over one ledger: submit, query, subscribe,
/// wait-for-finality.
///
/// Submits are idempotent: an adapter checks the on-chain view before
/// re-submitting, so replaying a `withdraw` or `refund` yields
/// `AlreadyProcessed` instead of a duplicate spend. Event polls are
/// at-least-once and finality-buffered — only events at least
/// `finality_depth` confirmations deep are emitted, and a cursor pointing
/// past a divergence yields `CursorGap` with the rewind target.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn ledger(&self) -> LedgerId;

    async fn create_escrow(&self, params: CreateEscrowParams) -> Result<(EscrowId, TxRef), ChainError>;

    async fn withdraw(&self, escrow_id: &EscrowId, secret: &Secret) -> Result<TxRef, ChainError>;

    async fn refund(&self, escrow_id: &EscrowId) -> Result<TxRef, ChainError>;

    async fn get_escrow(&self, escrow_id: &EscrowId) -> Result<Escrow, ChainError>;

    async fn find_escrows_by_digest(&self, digest: &Digest) -> Result<Vec<EscrowId>, ChainError>;

    /// Events strictly after `from`, bounded by `limit`, finalized only.
    async fn poll_events(&self, from: Cursor, limit: usize) -> Result<EventBatch, ChainError>;

    /// Block until `tx_ref` has the adapter's configured confirmations.
    async fn submit_and_wait(&self, tx_ref: &TxRef) -> Result<Receipt, ChainError>;

    async fn head_height(&self) -> Result<u64, ChainError>;

    /// Stake and register this coordinator as a resolver. Idempotent: a
    /// second registration with the same address is a no-op.
    async fn register_resolver(&self, stake: Amount) -> Result<(), ChainError>;
}

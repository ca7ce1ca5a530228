use serde::{Deserialize, Serialize};

use crate::escrow::Escrow;
use crate::types::{Cursor, Digest, EscrowId, LedgerId, Secret, TxRef};

/// Closed set of escrow lifecycle events. Every variant carries exact-typed
/// fields; adapters canonicalize whatever their gateway emits into this shape
/// before anything downstream sees it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum EscrowEvent {
    Created {
        escrow: Escrow,
    },
    Withdrawn {
        escrow_id: EscrowId,
        digest: Digest,
        secret: Secret,
        by: String,
    },
    Refunded {
        escrow_id: EscrowId,
        digest: Digest,
        by: String,
    },
}

/// Canonical event envelope: an [`EscrowEvent`] plus its on-chain position.
/// `(ledger, tx_ref, index)` is the at-least-once dedup key; `(height, index)`
/// orders events within a ledger.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct ChainEvent {
    pub ledger: LedgerId,
    pub height: u64,
    pub index: u32,
    pub tx_ref: TxRef,
    pub body: EscrowEvent,
}

impl ChainEvent {
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.height, self.index)
    }

    pub fn escrow_id(&self) -> &EscrowId {
        match &self.body {
            EscrowEvent::Created { escrow } => &escrow.escrow_id,
            EscrowEvent::Withdrawn { escrow_id, .. } => escrow_id,
            EscrowEvent::Refunded { escrow_id, .. } => escrow_id,
        }
    }

    pub fn digest(&self) -> &Digest {
        match &self.body {
            EscrowEvent::Created { escrow } => &escrow.digest,
            EscrowEvent::Withdrawn { digest, .. } => digest,
            EscrowEvent::Refunded { digest, .. } => digest,
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.body {
            EscrowEvent::Created { .. } => "created",
            EscrowEvent::Withdrawn { .. } => "withdrawn",
            EscrowEvent::Refunded { .. } => "refunded",
        }
    }

    /// Dedup key: ledger tag, transaction reference, event index.
    pub fn dedup_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + self.tx_ref.as_str().len() + 4);
        key.push(self.ledger.as_byte());
        key.extend_from_slice(self.tx_ref.as_str().as_bytes());
        key.extend_from_slice(&self.index.to_be_bytes());
        key
    }

    /// Position key for the append-only event log: orders by height then
    /// index within a ledger, so a rewind is a single range delete.
    pub fn position_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 8 + 4);
        key.push(self.ledger.as_byte());
        key.extend_from_slice(&self.height.to_be_bytes());
        key.extend_from_slice(&self.index.to_be_bytes());
        key
    }
}

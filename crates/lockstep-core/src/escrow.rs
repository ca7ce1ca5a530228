use serde::{Deserialize, Serialize};

use crate::error::LockstepError;
use crate::types::{Amount, Digest, EscrowId, HashAlgo, Secret, TimestampMs};

/// The coordinator's view of one on-chain HTLC escrow.
///
/// An escrow starts with neither terminal flag set and transitions to exactly
/// one of `withdrawn` / `refunded`, monotonically. `withdrawn` requires a
/// verified preimage; `refunded` requires the deadline to have passed with no
/// prior withdrawal. Both rules are enforced on-chain; this snapshot mirrors
/// them defensively so a buggy gateway cannot corrupt swap accounting.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Escrow {
    pub escrow_id: EscrowId,
    /// The locker: refunds return funds here after expiry.
    pub owner: String,
    /// The permitted claimer.
    pub beneficiary: String,
    /// Ledger-scoped token reference ("native" for the base asset).
    pub token: String,
    pub amount: Amount,
    pub digest: Digest,
    pub algo: HashAlgo,
    pub start_ms: TimestampMs,
    pub lock_duration_ms: i64,
    pub withdrawn: bool,
    pub refunded: bool,
    /// Preimage observed in the withdrawal event, once known to the core.
    pub revealed_secret: Option<Secret>,
}

impl Escrow {
    pub fn deadline_ms(&self) -> TimestampMs {
        self.start_ms + self.lock_duration_ms
    }

    pub fn is_terminal(&self) -> bool {
        self.withdrawn || self.refunded
    }

    pub fn is_expired(&self, now_ms: TimestampMs) -> bool {
        now_ms > self.deadline_ms()
    }

    /// Record an observed withdrawal. Rejects the transition if the escrow is
    /// already refunded (mutual exclusion of terminal flags).
    pub fn mark_withdrawn(&mut self, secret: Secret) -> Result<(), LockstepError> {
        if self.refunded {
            return Err(LockstepError::EscrowTerminal {
                withdrawn: self.withdrawn,
                refunded: self.refunded,
            });
        }
        self.withdrawn = true;
        self.revealed_secret = Some(secret);
        Ok(())
    }

    /// Record an observed refund. Rejects the transition if the escrow is
    /// already withdrawn.
    pub fn mark_refunded(&mut self) -> Result<(), LockstepError> {
        if self.withdrawn {
            return Err(LockstepError::EscrowTerminal {
                withdrawn: self.withdrawn,
                refunded: self.refunded,
            });
        }
        self.refunded = true;
        Ok(())
    }
}

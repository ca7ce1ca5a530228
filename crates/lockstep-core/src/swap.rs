use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Digest, EscrowId, HashAlgo, LedgerId, Secret, SwapId, TimestampMs, TxRef};

// ── Phase ────────────────────────────────────────────────────────────────────

/// Swap lifecycle. `Completed`, `Expired` and `Failed` are absorbing: a swap
/// never leaves a terminal phase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum SwapPhase {
    Pending,
    OneSideLocked,
    BothLocked,
    Revealed,
    Completed,
    Expired,
    Failed,
}

impl SwapPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SwapPhase::Completed | SwapPhase::Expired | SwapPhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapPhase::Pending => "Pending",
            SwapPhase::OneSideLocked => "OneSideLocked",
            SwapPhase::BothLocked => "BothLocked",
            SwapPhase::Revealed => "Revealed",
            SwapPhase::Completed => "Completed",
            SwapPhase::Expired => "Expired",
            SwapPhase::Failed => "Failed",
        }
    }
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Sides ────────────────────────────────────────────────────────────────────

/// Role of a side within the pair. The side with the later deadline is the
/// initiator's; assigned at pairing time once both deadlines are known.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum SwapRole {
    Initiator,
    Counterparty,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct SwapSide {
    pub escrow_id: EscrowId,
    pub role: Option<SwapRole>,
    /// Set once a refund submission for this side has been attempted, so the
    /// expiry invariant is auditable even when the ledger later reports the
    /// escrow gone.
    pub refund_attempted: bool,
}

impl SwapSide {
    pub fn new(escrow_id: EscrowId) -> Self {
        Self { escrow_id, role: None, refund_attempted: false }
    }
}

// ── Swap ─────────────────────────────────────────────────────────────────────

/// The coordinator's unit of work: one cross-ledger HTLC pair sharing a
/// hashlock digest.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Swap {
    pub swap_id: SwapId,
    pub digest: Digest,
    pub algo: HashAlgo,
    pub a_side: Option<SwapSide>,
    pub b_side: Option<SwapSide>,
    pub a_deadline_ms: Option<TimestampMs>,
    pub b_deadline_ms: Option<TimestampMs>,
    pub phase: SwapPhase,
    pub created_ms: TimestampMs,
    pub updated_ms: TimestampMs,
    pub last_error: Option<String>,
    pub retry_count: u32,
    /// Next scheduled re-evaluation (backoff timer), if any.
    pub retry_at_ms: Option<TimestampMs>,
    /// More than two escrows (or two on one ledger) matched this digest;
    /// automated progression is suspended until an operator intervenes.
    pub ambiguous: bool,
    /// Operator override: refund every still-locked expired side regardless
    /// of auto-policy.
    pub force_refund: bool,
    /// True when the swap was registered by an operator rather than born from
    /// an on-chain creation event. Operator-created swaps survive a rewind
    /// that strips their last side; event-born swaps are deleted.
    pub operator_created: bool,
    /// Optimistic-concurrency version; bumped by every store upsert.
    pub version: u64,
}

impl Swap {
    pub fn new(swap_id: SwapId, digest: Digest, algo: HashAlgo, now_ms: TimestampMs) -> Self {
        Self {
            swap_id,
            digest,
            algo,
            a_side: None,
            b_side: None,
            a_deadline_ms: None,
            b_deadline_ms: None,
            phase: SwapPhase::Pending,
            created_ms: now_ms,
            updated_ms: now_ms,
            last_error: None,
            retry_count: 0,
            retry_at_ms: None,
            ambiguous: false,
            force_refund: false,
            operator_created: false,
            version: 0,
        }
    }

    pub fn side(&self, ledger: LedgerId) -> Option<&SwapSide> {
        match ledger {
            LedgerId::A => self.a_side.as_ref(),
            LedgerId::B => self.b_side.as_ref(),
        }
    }

    pub fn side_mut(&mut self, ledger: LedgerId) -> Option<&mut SwapSide> {
        match ledger {
            LedgerId::A => self.a_side.as_mut(),
            LedgerId::B => self.b_side.as_mut(),
        }
    }

    pub fn set_side(&mut self, ledger: LedgerId, side: SwapSide) {
        match ledger {
            LedgerId::A => self.a_side = Some(side),
            LedgerId::B => self.b_side = Some(side),
        }
    }

    pub fn clear_side(&mut self, ledger: LedgerId) {
        match ledger {
            LedgerId::A => {
                self.a_side = None;
                self.a_deadline_ms = None;
            }
            LedgerId::B => {
                self.b_side = None;
                self.b_deadline_ms = None;
            }
        }
    }

    pub fn deadline(&self, ledger: LedgerId) -> Option<TimestampMs> {
        match ledger {
            LedgerId::A => self.a_deadline_ms,
            LedgerId::B => self.b_deadline_ms,
        }
    }

    pub fn set_deadline(&mut self, ledger: LedgerId, deadline_ms: TimestampMs) {
        match ledger {
            LedgerId::A => self.a_deadline_ms = Some(deadline_ms),
            LedgerId::B => self.b_deadline_ms = Some(deadline_ms),
        }
    }

    pub fn sides_count(&self) -> usize {
        self.a_side.iter().count() + self.b_side.iter().count()
    }

    pub fn has_both_sides(&self) -> bool {
        self.a_side.is_some() && self.b_side.is_some()
    }

    /// Earliest known deadline across both sides, used to arm expiry timers.
    pub fn earliest_deadline_ms(&self) -> Option<TimestampMs> {
        match (self.a_deadline_ms, self.b_deadline_ms) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn touch(&mut self, now_ms: TimestampMs) {
        self.updated_ms = now_ms;
    }

    /// Next instant the scheduler should look at this swap: the sooner of
    /// the earliest deadline and any pending backoff timer.
    pub fn next_wake_ms(&self) -> Option<TimestampMs> {
        match (self.earliest_deadline_ms(), self.retry_at_ms) {
            (Some(d), Some(r)) => Some(d.min(r)),
            (Some(d), None) => Some(d),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        }
    }
}

// ── Signals ──────────────────────────────────────────────────────────────────

/// Why a swap is being (re-)evaluated. Carried on the bounded channel from
/// the ingestor / timer wheel / operator surface into the engine workers.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub enum SignalReason {
    /// A new on-chain event touched this swap.
    Event,
    /// A deadline or backoff timer fired.
    Timer,
    /// Operator action (force-refund).
    Operator,
    /// Startup or conflict-reload re-evaluation.
    Reconcile,
}

impl fmt::Display for SignalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalReason::Event => write!(f, "event"),
            SignalReason::Timer => write!(f, "timer"),
            SignalReason::Operator => write!(f, "operator"),
            SignalReason::Reconcile => write!(f, "reconcile"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SwapSignal {
    pub swap_id: SwapId,
    pub reason: SignalReason,
}

// ── Reveal ───────────────────────────────────────────────────────────────────

/// A preimage observed on-chain, recorded once when the first withdrawal on
/// either ledger is seen. Drives the complementary side.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct Reveal {
    pub swap_id: SwapId,
    pub digest: Digest,
    pub secret: Secret,
    pub source_ledger: LedgerId,
    pub source_tx_ref: TxRef,
    pub observed_ms: TimestampMs,
}

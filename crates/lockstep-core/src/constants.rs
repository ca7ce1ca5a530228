//! ─── Lockstep protocol constants ────────────────────────────────────────────
//!
//! Timeout profiles, scheduler resolution, and fee arithmetic shared by every
//! crate in the workspace.

use crate::types::Amount;

// ── Timeout profiles ─────────────────────────────────────────────────────────

/// Per-network timelock policy. The source side (initiator) always carries
/// the later deadline; the spread between the two deadlines must stay at or
/// above `safety_margin_ms` so the responding side can react to a reveal
/// before its own lock expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutProfile {
    pub source_deadline_ms: i64,
    pub dest_deadline_ms: i64,
    pub safety_margin_ms: i64,
    pub min_timeout_ms: i64,
}

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

pub const MAINNET_PROFILE: TimeoutProfile = TimeoutProfile {
    source_deadline_ms: 3 * HOUR_MS,
    dest_deadline_ms: 30 * MINUTE_MS,
    safety_margin_ms: 30 * MINUTE_MS,
    min_timeout_ms: 10 * MINUTE_MS,
};

pub const TESTNET_PROFILE: TimeoutProfile = TimeoutProfile {
    source_deadline_ms: 30 * MINUTE_MS,
    dest_deadline_ms: 5 * MINUTE_MS,
    safety_margin_ms: 5 * MINUTE_MS,
    min_timeout_ms: 2 * MINUTE_MS,
};

pub const DEVNET_PROFILE: TimeoutProfile = TimeoutProfile {
    source_deadline_ms: 10 * MINUTE_MS,
    dest_deadline_ms: 2 * MINUTE_MS,
    safety_margin_ms: 2 * MINUTE_MS,
    min_timeout_ms: 1 * MINUTE_MS,
};

// ── Scheduler ────────────────────────────────────────────────────────────────

/// Timer wheel tick resolution.
pub const TIMER_RESOLUTION_MS: i64 = 1_000;

/// Bounded re-decide loop when an optimistic write loses the race.
pub const MAX_CONFLICT_RETRIES: u32 = 4;

/// Short wait before re-attempting a refund the ledger rejected as not yet
/// expired (clock skew between coordinator and ledger).
pub const NOT_EXPIRED_RETRY_MS: i64 = 15_000;

// ── Defaults (overridable via config) ────────────────────────────────────────

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_EVENT_BATCH: usize = 256;
pub const DEFAULT_FINALITY_DEPTH_A: u64 = 12;
pub const DEFAULT_FINALITY_DEPTH_B: u64 = 1;
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;
pub const DEFAULT_WORKER_COUNT: usize = 8;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 500;
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;
pub const DEFAULT_RETENTION_MS: i64 = 24 * HOUR_MS;
pub const DEFAULT_RPC_LISTEN: &str = "127.0.0.1:7700";

// ── Fees ─────────────────────────────────────────────────────────────────────

/// Fee denominator: fees are expressed in basis points, 0..=10000.
pub const FEE_BPS_DENOM: u32 = 10_000;

/// Net amount after a basis-point fee, floored so `net + fee == amount`
/// exactly and no smallest unit is ever lost.
pub fn net_after_fee(amount: Amount, fee_bps: u32) -> Amount {
    assert!(fee_bps <= FEE_BPS_DENOM, "fee_bps must be 0..=10000");
    amount * (FEE_BPS_DENOM - fee_bps) as Amount / FEE_BPS_DENOM as Amount
}

/// The fee counterpart of [`net_after_fee`].
pub fn fee_for(amount: Amount, fee_bps: u32) -> Amount {
    amount - net_after_fee(amount, fee_bps)
}

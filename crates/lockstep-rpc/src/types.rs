use serde::{Deserialize, Serialize};

use lockstep_core::constants::net_after_fee;
use lockstep_core::escrow::Escrow;
use lockstep_core::swap::{Swap, SwapRole, SwapSide};

/// Wire view of an escrow. Amounts are stringified: JSON numbers do not
/// survive 128-bit values.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RpcEscrow {
    pub escrow_id: String,
    pub ledger: String,
    pub owner: String,
    pub beneficiary: String,
    pub token: String,
    pub amount: String,
    /// Amount net of the configured resolver fee.
    pub net_amount: String,
    pub digest: String,
    pub algorithm_flag: u8,
    pub start_ms: i64,
    pub deadline_ms: i64,
    pub withdrawn: bool,
    pub refunded: bool,
}

impl RpcEscrow {
    pub fn from_escrow(escrow: &Escrow, fee_bps: u32) -> Self {
        Self {
            escrow_id: escrow.escrow_id.id.clone(),
            ledger: escrow.escrow_id.ledger.to_string(),
            owner: escrow.owner.clone(),
            beneficiary: escrow.beneficiary.clone(),
            token: escrow.token.clone(),
            amount: escrow.amount.to_string(),
            net_amount: net_after_fee(escrow.amount, fee_bps).to_string(),
            digest: escrow.digest.to_hex(),
            algorithm_flag: escrow.algo.as_flag(),
            start_ms: escrow.start_ms,
            deadline_ms: escrow.deadline_ms(),
            withdrawn: escrow.withdrawn,
            refunded: escrow.refunded,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RpcSide {
    pub escrow_id: String,
    pub ledger: String,
    pub role: Option<String>,
    pub refund_attempted: bool,
    pub escrow: Option<RpcEscrow>,
}

impl RpcSide {
    pub fn from_side(side: &SwapSide, escrow: Option<&Escrow>, fee_bps: u32) -> Self {
        Self {
            escrow_id: side.escrow_id.id.clone(),
            ledger: side.escrow_id.ledger.to_string(),
            role: side.role.map(|r| match r {
                SwapRole::Initiator => "initiator".to_string(),
                SwapRole::Counterparty => "counterparty".to_string(),
            }),
            refund_attempted: side.refund_attempted,
            escrow: escrow.map(|e| RpcEscrow::from_escrow(e, fee_bps)),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RpcSwap {
    pub swap_id: String,
    pub phase: String,
    pub digest: String,
    pub algorithm: String,
    pub a_side: Option<RpcSide>,
    pub b_side: Option<RpcSide>,
    pub a_deadline_ms: Option<i64>,
    pub b_deadline_ms: Option<i64>,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub ambiguous: bool,
    pub force_refund: bool,
    pub version: u64,
}

impl RpcSwap {
    pub fn from_swap(
        swap: &Swap,
        escrow_a: Option<&Escrow>,
        escrow_b: Option<&Escrow>,
        fee_bps: u32,
    ) -> Self {
        Self {
            swap_id: swap.swap_id.to_hex(),
            phase: swap.phase.as_str().to_string(),
            digest: swap.digest.to_hex(),
            algorithm: swap.algo.to_string(),
            a_side: swap.a_side.as_ref().map(|s| RpcSide::from_side(s, escrow_a, fee_bps)),
            b_side: swap.b_side.as_ref().map(|s| RpcSide::from_side(s, escrow_b, fee_bps)),
            a_deadline_ms: swap.a_deadline_ms,
            b_deadline_ms: swap.b_deadline_ms,
            created_ms: swap.created_ms,
            updated_ms: swap.updated_ms,
            retry_count: swap.retry_count,
            last_error: swap.last_error.clone(),
            ambiguous: swap.ambiguous,
            force_refund: swap.force_refund,
            version: swap.version,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RpcLedgerHealth {
    pub ledger: String,
    pub connected: bool,
    pub head_height: u64,
    pub cursor_height: u64,
    pub cursor_lag: u64,
    pub events_ingested: u64,
    pub cursor_rewinds: u64,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RpcHealth {
    pub ok: bool,
    pub network: String,
    pub store_ok: bool,
    pub ledger_a: RpcLedgerHealth,
    pub ledger_b: RpcLedgerHealth,
    pub active_swaps: u64,
    pub ambiguous_swaps: u64,
    pub incidents: u64,
}

use thiserror::Error;

use lockstep_core::types::Cursor;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    // ── Submission failures ──────────────────────────────────────────────────
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("timed out waiting for the ledger")]
    Timeout,

    #[error("secret does not match the escrow hashlock")]
    InvalidSecret,

    #[error("escrow lock has expired; withdrawal refused")]
    Expired,

    #[error("operation already processed on-chain")]
    AlreadyProcessed,

    #[error("escrow lock has not yet expired; refund refused")]
    NotExpired,

    #[error("caller is not authorized for this escrow")]
    Unauthorized,

    // ── Query failures ───────────────────────────────────────────────────────
    #[error("escrow not found: {0}")]
    NotFound(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    // ── Subscription failures ────────────────────────────────────────────────
    #[error("event subscription disconnected: {0}")]
    Disconnected(String),

    #[error("cursor beyond finalized history; rewind to {rewind_to}")]
    CursorGap { rewind_to: Cursor },

    #[error("transaction dropped by a reorg")]
    Reorg,

    // ── Gateway plumbing ─────────────────────────────────────────────────────
    #[error("gateway error: {0}")]
    Gateway(String),
}

impl ChainError {
    pub fn code(&self) -> &'static str {
        match self {
            ChainError::InsufficientFunds => "insufficient_funds",
            ChainError::Rejected(_) => "rejected",
            ChainError::Timeout => "timeout",
            ChainError::InvalidSecret => "invalid_secret",
            ChainError::Expired => "expired",
            ChainError::AlreadyProcessed => "already_processed",
            ChainError::NotExpired => "not_expired",
            ChainError::Unauthorized => "unauthorized",
            ChainError::NotFound(_) => "not_found",
            ChainError::Unavailable(_) => "unavailable",
            ChainError::Disconnected(_) => "disconnected",
            ChainError::CursorGap { .. } => "cursor_gap",
            ChainError::Reorg => "reorg",
            ChainError::Gateway(_) => "gateway",
        }
    }

    /// Transient failures worth retrying with backoff. `AlreadyProcessed` is
    /// success from the caller's point of view, `NotExpired` is rescheduled
    /// at the deadline rather than retried, and `InvalidSecret` must never be
    /// retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChainError::Timeout
                | ChainError::Unavailable(_)
                | ChainError::Disconnected(_)
                | ChainError::Reorg
                | ChainError::Gateway(_)
        )
    }
}

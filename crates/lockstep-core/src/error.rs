use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockstepError {
    // ── Encoding ─────────────────────────────────────────────────────────────
    #[error("invalid hex: {0}")]
    BadHex(String),

    #[error("invalid hex length: expected {expected} chars, got {got}")]
    BadHexLength { expected: usize, got: usize },

    #[error("unsupported hash algorithm flag: {0}")]
    UnsupportedAlgorithm(u8),

    #[error("unknown ledger tag: {0}")]
    UnknownLedger(char),

    // ── Swap / escrow state ──────────────────────────────────────────────────
    #[error("unknown swap: {0}")]
    UnknownSwap(String),

    #[error("unknown escrow: {0}")]
    UnknownEscrow(String),

    #[error("escrow already terminal (withdrawn={withdrawn}, refunded={refunded})")]
    EscrowTerminal { withdrawn: bool, refunded: bool },

    #[error("invalid phase transition: {from} -> {to}")]
    PhaseTransition { from: &'static str, to: &'static str },

    #[error("ambiguous pairing: digest {0} matched by more than one escrow per ledger")]
    AmbiguousPairing(String),

    #[error("mixed hash algorithms across the pair: {a} vs {b}")]
    MixedAlgorithm { a: &'static str, b: &'static str },

    #[error("deadline spread {spread_ms}ms below safety margin {margin_ms}ms")]
    SafetyMarginViolation { spread_ms: i64, margin_ms: i64 },

    #[error("escrow deadline {deadline_ms} too soon: minimum timeout {min_ms}ms from now")]
    DeadlineTooSoon { deadline_ms: i64, min_ms: i64 },

    #[error("amount {amount} outside policy bounds [{min}, {max}]")]
    AmountOutOfBounds { amount: u128, min: u128, max: u128 },

    #[error("revealed secret does not hash to the swap digest")]
    RevealMismatch,

    // ── Store ────────────────────────────────────────────────────────────────
    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    #[error("cursor regression: {from} -> {to} without rewind")]
    CursorRegression { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl LockstepError {
    /// Stable machine-readable code, for metrics and operator tooling.
    pub fn code(&self) -> &'static str {
        match self {
            LockstepError::BadHex(_) => "bad_hex",
            LockstepError::BadHexLength { .. } => "bad_hex_length",
            LockstepError::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            LockstepError::UnknownLedger(_) => "unknown_ledger",
            LockstepError::UnknownSwap(_) => "unknown_swap",
            LockstepError::UnknownEscrow(_) => "unknown_escrow",
            LockstepError::EscrowTerminal { .. } => "escrow_terminal",
            LockstepError::PhaseTransition { .. } => "phase_transition",
            LockstepError::AmbiguousPairing(_) => "ambiguous_pairing",
            LockstepError::MixedAlgorithm { .. } => "mixed_algorithm",
            LockstepError::SafetyMarginViolation { .. } => "safety_margin",
            LockstepError::DeadlineTooSoon { .. } => "deadline_too_soon",
            LockstepError::AmountOutOfBounds { .. } => "amount_bounds",
            LockstepError::RevealMismatch => "reveal_mismatch",
            LockstepError::VersionConflict { .. } => "version_conflict",
            LockstepError::CursorRegression { .. } => "cursor_regression",
            LockstepError::Serialization(_) => "serialization",
            LockstepError::Storage(_) => "storage",
            LockstepError::InvalidConfig(_) => "invalid_config",
            LockstepError::Other(_) => "other",
        }
    }

    /// Whether a caller may retry the same operation and expect progress.
    /// Policy violations and state conflicts that require a reload are not
    /// blanket-retryable; `VersionConflict` is (reload then re-decide).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LockstepError::VersionConflict { .. } | LockstepError::Storage(_)
        )
    }
}

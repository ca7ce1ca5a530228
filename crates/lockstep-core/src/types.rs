use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::LockstepError;

/// Asset amount in the ledger's smallest unit. u128 covers 18-decimal tokens
/// with room to spare.
pub type Amount = u128;

/// Unix timestamp in milliseconds, UTC.
pub type TimestampMs = i64;

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

// ── Clock ────────────────────────────────────────────────────────────────────

/// Time source, passed explicitly wherever deadlines are judged so the swap
/// engine is deterministic under test.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> TimestampMs;
}

#[derive(Default, Clone, Copy, Debug)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        now_ms()
    }
}

/// Manually-driven clock for tests and devnet simulation.
#[derive(Debug)]
pub struct ManualClock(std::sync::atomic::AtomicI64);

impl ManualClock {
    pub fn new(start_ms: TimestampMs) -> Self {
        Self(std::sync::atomic::AtomicI64::new(start_ms))
    }

    pub fn set(&self, now: TimestampMs) {
        self.0.store(now, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.0.fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

// ── LedgerId ─────────────────────────────────────────────────────────────────

/// The two ledgers a swap spans. A is the EVM-style chain (addresses,
/// 0x-prefixed call data), B is the object-style chain (object ids, bare hex).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Debug)]
pub enum LedgerId {
    A,
    B,
}

impl LedgerId {
    pub fn as_byte(&self) -> u8 {
        match self {
            LedgerId::A => b'A',
            LedgerId::B => b'B',
        }
    }

    pub fn from_byte(b: u8) -> Result<Self, LockstepError> {
        match b {
            b'A' => Ok(LedgerId::A),
            b'B' => Ok(LedgerId::B),
            other => Err(LockstepError::UnknownLedger(other as char)),
        }
    }

    /// The ledger on the other side of a swap.
    pub fn other(&self) -> LedgerId {
        match self {
            LedgerId::A => LedgerId::B,
            LedgerId::B => LedgerId::A,
        }
    }
}

impl fmt::Display for LedgerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerId::A => write!(f, "A"),
            LedgerId::B => write!(f, "B"),
        }
    }
}

// ── HashAlgo ─────────────────────────────────────────────────────────────────

/// Hashlock algorithm. Pinned per swap; both sides of a pair must carry the
/// same wire flag (0 = Keccak-256, 1 = SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub enum HashAlgo {
    Keccak256,
    Sha256,
}

impl HashAlgo {
    pub fn as_flag(&self) -> u8 {
        match self {
            HashAlgo::Keccak256 => 0,
            HashAlgo::Sha256 => 1,
        }
    }

    pub fn from_flag(flag: u8) -> Result<Self, LockstepError> {
        match flag {
            0 => Ok(HashAlgo::Keccak256),
            1 => Ok(HashAlgo::Sha256),
            other => Err(LockstepError::UnsupportedAlgorithm(other)),
        }
    }
}

impl fmt::Display for HashAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgo::Keccak256 => write!(f, "keccak256"),
            HashAlgo::Sha256 => write!(f, "sha256"),
        }
    }
}

// ── Hex helpers ──────────────────────────────────────────────────────────────

/// Strict 32-byte hex decode: even length enforced by the fixed width,
/// case-insensitive input, optional `0x` prefix accepted.
fn decode_hex_32(s: &str) -> Result<[u8; 32], LockstepError> {
    let bare = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    if bare.len() != 64 {
        return Err(LockstepError::BadHexLength { expected: 64, got: bare.len() });
    }
    let bytes = hex::decode(bare).map_err(|e| LockstepError::BadHex(e.to_string()))?;
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

// ── Secret ───────────────────────────────────────────────────────────────────

/// 32-byte hashlock preimage. Zeroized on drop; Debug/Display render only a
/// redacted prefix so a secret never lands in a trace by accident.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full lowercase hex. Only for wire encoding — never log this.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, LockstepError> {
        Ok(Self(decode_hex_32(s)?))
    }

    /// First 4 bytes as hex, for traces.
    pub fn redacted(&self) -> String {
        format!("{}…", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.redacted())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.redacted())
    }
}

// ── Digest ───────────────────────────────────────────────────────────────────

/// 32-byte hashlock digest. Canonical form is lowercase hex without prefix;
/// ledger-A call data carries the `0x`-prefixed form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, LockstepError> {
        Ok(Self(decode_hex_32(s)?))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}…)", &self.to_hex()[..16])
    }
}

// ── EscrowId ─────────────────────────────────────────────────────────────────

/// Ledger-scoped escrow identity: a contract address on A, an object id on B.
/// The inner string is opaque to the coordinator.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EscrowId {
    pub ledger: LedgerId,
    pub id: String,
}

impl EscrowId {
    pub fn new(ledger: LedgerId, id: impl Into<String>) -> Self {
        Self { ledger, id: id.into() }
    }

    /// Stable storage key: ledger tag byte followed by the raw id bytes.
    pub fn key_bytes(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + self.id.len());
        key.push(self.ledger.as_byte());
        key.extend_from_slice(self.id.as_bytes());
        key
    }
}

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger, self.id)
    }
}

impl fmt::Debug for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EscrowId({self})")
    }
}

// ── TxRef ────────────────────────────────────────────────────────────────────

/// Opaque on-chain transaction reference (hash or digest string).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── SwapId ───────────────────────────────────────────────────────────────────

/// 32-byte swap identifier, content-addressed from the swap's hashlock (see
/// lockstep-crypto) so independent coordinators derive the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SwapId(pub [u8; 32]);

impl SwapId {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, LockstepError> {
        Ok(Self(decode_hex_32(s)?))
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SwapId({}…)", &self.to_hex()[..16])
    }
}

// ── Cursor ───────────────────────────────────────────────────────────────────

/// Per-ledger ingestion position: last processed block/checkpoint height and
/// event index within it. Monotone non-decreasing in program order; the only
/// sanctioned regression is an explicit reorg rewind.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug, Default)]
pub struct Cursor {
    pub height: u64,
    pub index: u32,
}

impl Cursor {
    pub const ZERO: Cursor = Cursor { height: 0, index: 0 };

    pub fn new(height: u64, index: u32) -> Self {
        Self { height, index }
    }

    /// Position after every possible event at `height`; events strictly above
    /// this cursor all have a greater height.
    pub fn end_of_height(height: u64) -> Self {
        Self { height, index: u32::MAX }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.height, self.index)
    }
}

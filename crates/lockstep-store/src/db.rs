use std::path::Path;

use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::Transactional;

use lockstep_core::error::LockstepError;
use lockstep_core::escrow::Escrow;
use lockstep_core::event::ChainEvent;
use lockstep_core::swap::{Reveal, Swap, SwapPhase};
use lockstep_core::types::{Cursor, Digest, EscrowId, LedgerId, SwapId, TimestampMs};

/// Durable swap state backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   swaps        — SwapId bytes                    → bincode(Swap)
///   escrows      — ledger byte + escrow id bytes   → bincode(Escrow)
///   reveals      — SwapId bytes                    → bincode(Reveal)
///   cursors      — ledger byte                     → bincode(Cursor)
///   events       — ledger + height be + index be   → bincode(ChainEvent)
///   seen         — ledger + tx_ref + index be      → [] (at-least-once dedup)
///   digest_idx   — Digest bytes                    → SwapId bytes
///   deadline_idx — wake ms be + SwapId bytes       → [] (timer rebuild scans)
///
/// Swap writes are optimistically versioned: every upsert bumps
/// `Swap::version`, and a caller holding a stale version gets
/// `VersionConflict` and must reload and re-decide. Event ingestion goes
/// through [`SwapStore::atomic_apply`], which persists the event, the swap
/// mutation, and the cursor advance as one transaction so a crash can never
/// consume an event without recording it.
pub struct SwapStore {
    db: sled::Db,
    swaps: sled::Tree,
    escrows: sled::Tree,
    reveals: sled::Tree,
    cursors: sled::Tree,
    events: sled::Tree,
    seen: sled::Tree,
    digest_idx: sled::Tree,
    deadline_idx: sled::Tree,
}

fn storage_err(e: impl std::fmt::Display) -> LockstepError {
    LockstepError::Storage(e.to_string())
}

fn ser<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, LockstepError> {
    bincode::serialize(value).map_err(|e| LockstepError::Serialization(e.to_string()))
}

fn de<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, LockstepError> {
    bincode::deserialize(bytes).map_err(|e| LockstepError::Serialization(e.to_string()))
}

// In-transaction variants: abort instead of returning plain errors.
fn tser<T: serde::Serialize>(
    value: &T,
) -> Result<Vec<u8>, ConflictableTransactionError<LockstepError>> {
    ser(value).map_err(ConflictableTransactionError::Abort)
}

fn tde<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, ConflictableTransactionError<LockstepError>> {
    de(bytes).map_err(ConflictableTransactionError::Abort)
}

fn unwrap_txn(e: TransactionError<LockstepError>) -> LockstepError {
    match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(s) => storage_err(s),
    }
}

fn wake_key(wake_ms: TimestampMs, swap_id: &SwapId) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + 32);
    key.extend_from_slice(&(wake_ms.max(0) as u64).to_be_bytes());
    key.extend_from_slice(swap_id.as_bytes());
    key
}

/// Versioned swap write inside an open transaction: checks
/// `expected_version` against the stored record, bumps the version, and
/// keeps the digest and deadline indexes in step.
fn stage_swap(
    swaps: &TransactionalTree,
    digest_idx: &TransactionalTree,
    deadline_idx: &TransactionalTree,
    swap: &Swap,
    expected_version: Option<u64>,
) -> Result<u64, ConflictableTransactionError<LockstepError>> {
    let key = swap.swap_id.as_bytes().to_vec();
    let current: Option<Swap> = match swaps.get(&key)? {
        Some(bytes) => Some(tde(&bytes)?),
        None => None,
    };
    let found = current.as_ref().map(|s| s.version).unwrap_or(0);
    if let Some(expected) = expected_version {
        if found != expected {
            return Err(ConflictableTransactionError::Abort(
                LockstepError::VersionConflict { expected, found },
            ));
        }
    }

    // Drop the old timer entry before inserting the new one.
    if let Some(cur) = &current {
        if !cur.is_terminal() {
            if let Some(wake) = cur.next_wake_ms() {
                deadline_idx.remove(wake_key(wake, &cur.swap_id))?;
            }
        }
    }

    let mut next = swap.clone();
    next.version = found + 1;
    if !next.is_terminal() {
        if let Some(wake) = next.next_wake_ms() {
            deadline_idx.insert(wake_key(wake, &next.swap_id), &[] as &[u8])?;
        }
    }
    digest_idx.insert(next.digest.as_bytes().to_vec(), key.clone())?;
    swaps.insert(key, tser(&next)?)?;
    Ok(next.version)
}

impl SwapStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LockstepError> {
        let db = sled::open(path).map_err(storage_err)?;
        let swaps        = db.open_tree("swaps").map_err(storage_err)?;
        let escrows      = db.open_tree("escrows").map_err(storage_err)?;
        let reveals      = db.open_tree("reveals").map_err(storage_err)?;
        let cursors      = db.open_tree("cursors").map_err(storage_err)?;
        let events       = db.open_tree("events").map_err(storage_err)?;
        let seen         = db.open_tree("seen").map_err(storage_err)?;
        let digest_idx   = db.open_tree("digest_idx").map_err(storage_err)?;
        let deadline_idx = db.open_tree("deadline_idx").map_err(storage_err)?;
        Ok(Self { db, swaps, escrows, reveals, cursors, events, seen, digest_idx, deadline_idx })
    }

    // ── Swaps ────────────────────────────────────────────────────────────────

    pub fn get_swap(&self, swap_id: &SwapId) -> Result<Option<Swap>, LockstepError> {
        match self.swaps.get(swap_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Versioned upsert. `expected_version` of `Some(0)` means "insert only
    /// if absent"; `None` is unconditional (last writer wins). On success the
    /// caller's record is updated to the new stored version.
    pub fn upsert_swap(
        &self,
        swap: &mut Swap,
        expected_version: Option<u64>,
    ) -> Result<u64, LockstepError> {
        let result = (&self.swaps, &self.digest_idx, &self.deadline_idx)
            .transaction(|(swaps, digest_idx, deadline_idx)| {
                stage_swap(swaps, digest_idx, deadline_idx, swap, expected_version)
            })
            .map_err(unwrap_txn)?;
        swap.version = result;
        Ok(result)
    }

    pub fn swap_by_digest(&self, digest: &Digest) -> Result<Option<Swap>, LockstepError> {
        match self.digest_idx.get(digest.as_bytes()).map_err(storage_err)? {
            Some(key) => match self.swaps.get(&key).map_err(storage_err)? {
                Some(bytes) => Ok(Some(de(&bytes)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    pub fn swaps_by_phase(&self, phase: SwapPhase) -> Result<Vec<Swap>, LockstepError> {
        let mut result = Vec::new();
        for item in self.swaps.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let swap: Swap = de(&bytes)?;
            if swap.phase == phase {
                result.push(swap);
            }
        }
        Ok(result)
    }

    /// Every non-terminal swap, for startup re-evaluation and the operator
    /// list view.
    pub fn active_swaps(&self) -> Result<Vec<Swap>, LockstepError> {
        let mut result = Vec::new();
        for item in self.swaps.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let swap: Swap = de(&bytes)?;
            if !swap.is_terminal() {
                result.push(swap);
            }
        }
        Ok(result)
    }

    /// Swaps whose next wake (deadline or retry timer) is at or before `t`,
    /// via the deadline index — this is the timer-wheel rebuild scan.
    pub fn swaps_with_wake_before(&self, t: TimestampMs) -> Result<Vec<Swap>, LockstepError> {
        let upper = wake_key(t, &SwapId::from_bytes([0xff; 32]));
        let mut result = Vec::new();
        for item in self.deadline_idx.range(..=upper) {
            let (key, _) = item.map_err(storage_err)?;
            let mut id = [0u8; 32];
            id.copy_from_slice(&key[8..40]);
            if let Some(swap) = self.get_swap(&SwapId::from_bytes(id))? {
                result.push(swap);
            }
        }
        Ok(result)
    }

    /// Terminal swaps last touched before `t` — the retention sweep input.
    pub fn terminal_swaps_updated_before(&self, t: TimestampMs) -> Result<Vec<Swap>, LockstepError> {
        let mut result = Vec::new();
        for item in self.swaps.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let swap: Swap = de(&bytes)?;
            if swap.is_terminal() && swap.updated_ms < t {
                result.push(swap);
            }
        }
        Ok(result)
    }

    /// Remove a swap and everything hanging off it: reveal, escrow rows,
    /// both index entries.
    pub fn purge_swap(&self, swap_id: &SwapId) -> Result<(), LockstepError> {
        let Some(swap) = self.get_swap(swap_id)? else { return Ok(()) };
        for side in [&swap.a_side, &swap.b_side].into_iter().flatten() {
            self.escrows.remove(side.escrow_id.key_bytes()).map_err(storage_err)?;
        }
        self.reveals.remove(swap_id.as_bytes()).map_err(storage_err)?;
        self.digest_idx.remove(swap.digest.as_bytes()).map_err(storage_err)?;
        if let Some(wake) = swap.next_wake_ms() {
            self.deadline_idx.remove(wake_key(wake, swap_id)).map_err(storage_err)?;
        }
        self.swaps.remove(swap_id.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn count_swaps(&self) -> u64 {
        self.swaps.len() as u64
    }

    // ── Escrows ──────────────────────────────────────────────────────────────

    pub fn get_escrow(&self, escrow_id: &EscrowId) -> Result<Option<Escrow>, LockstepError> {
        match self.escrows.get(escrow_id.key_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_escrow(&self, escrow: &Escrow) -> Result<(), LockstepError> {
        self.escrows
            .insert(escrow.escrow_id.key_bytes(), ser(escrow)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Reveals ──────────────────────────────────────────────────────────────

    pub fn get_reveal(&self, swap_id: &SwapId) -> Result<Option<Reveal>, LockstepError> {
        match self.reveals.get(swap_id.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(de(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert-once: the first observed reveal wins, later duplicates are
    /// ignored. Returns whether this call inserted.
    pub fn put_reveal_if_absent(&self, reveal: &Reveal) -> Result<bool, LockstepError> {
        let key = reveal.swap_id.as_bytes();
        if self.reveals.contains_key(key).map_err(storage_err)? {
            return Ok(false);
        }
        self.reveals.insert(key, ser(reveal)?).map_err(storage_err)?;
        Ok(true)
    }

    // ── Cursors ──────────────────────────────────────────────────────────────

    pub fn cursor(&self, ledger: LedgerId) -> Result<Cursor, LockstepError> {
        match self.cursors.get([ledger.as_byte()]).map_err(storage_err)? {
            Some(bytes) => de(&bytes),
            None => Ok(Cursor::ZERO),
        }
    }

    /// Monotone cursor advance. Regression is refused here; the only
    /// sanctioned way back is [`SwapStore::rewind`].
    pub fn put_cursor(&self, ledger: LedgerId, cursor: Cursor) -> Result<(), LockstepError> {
        let current = self.cursor(ledger)?;
        if cursor < current {
            return Err(LockstepError::CursorRegression {
                from: current.to_string(),
                to: cursor.to_string(),
            });
        }
        self.cursors
            .insert([ledger.as_byte()], ser(&cursor)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Event log ────────────────────────────────────────────────────────────

    pub fn seen_event(&self, event: &ChainEvent) -> Result<bool, LockstepError> {
        self.seen.contains_key(event.dedup_key()).map_err(storage_err)
    }

    /// Apply one ingested event atomically: record it in the log and dedup
    /// set, upsert the swap (versioned), refresh the escrow snapshot, insert
    /// the reveal if this is the first one, and advance the cursor — all or
    /// nothing.
    pub fn atomic_apply(
        &self,
        event: &ChainEvent,
        swap: &mut Swap,
        expected_version: Option<u64>,
        escrow: Option<&Escrow>,
        reveal: Option<&Reveal>,
    ) -> Result<u64, LockstepError> {
        let trees = (
            &self.swaps,
            &self.escrows,
            &self.reveals,
            &self.cursors,
            &self.events,
            &self.seen,
            &self.digest_idx,
            &self.deadline_idx,
        );
        let version = trees
            .transaction(
                |(swaps, escrows, reveals, cursors, events, seen, digest_idx, deadline_idx)| {
                    events.insert(event.position_key(), tser(event)?)?;
                    seen.insert(event.dedup_key(), &[] as &[u8])?;

                    if let Some(escrow) = escrow {
                        escrows.insert(escrow.escrow_id.key_bytes(), tser(escrow)?)?;
                    }
                    if let Some(reveal) = reveal {
                        let key = reveal.swap_id.as_bytes().to_vec();
                        if reveals.get(&key)?.is_none() {
                            reveals.insert(key, tser(reveal)?)?;
                        }
                    }

                    // Cursor advances to at least this event's position.
                    let cursor_key = [event.ledger.as_byte()];
                    let current: Cursor = match cursors.get(cursor_key)? {
                        Some(bytes) => tde(&bytes)?,
                        None => Cursor::ZERO,
                    };
                    let advanced = current.max(event.cursor());
                    cursors.insert(cursor_key.to_vec(), tser(&advanced)?)?;

                    stage_swap(swaps, digest_idx, deadline_idx, swap, expected_version)
                },
            )
            .map_err(unwrap_txn)?;
        swap.version = version;
        Ok(version)
    }

    /// Record an event that matched no swap (orphan): log, dedup set and
    /// cursor advance, atomically, with no swap write.
    pub fn record_event_only(&self, event: &ChainEvent) -> Result<(), LockstepError> {
        (&self.events, &self.seen, &self.cursors)
            .transaction(|(events, seen, cursors)| {
                events.insert(event.position_key(), tser(event)?)?;
                seen.insert(event.dedup_key(), &[] as &[u8])?;
                let cursor_key = [event.ledger.as_byte()];
                let current: Cursor = match cursors.get(cursor_key)? {
                    Some(bytes) => tde(&bytes)?,
                    None => Cursor::ZERO,
                };
                let advanced = current.max(event.cursor());
                cursors.insert(cursor_key.to_vec(), tser(&advanced)?)?;
                Ok(())
            })
            .map_err(unwrap_txn)
    }

    pub fn delete_escrow(&self, escrow_id: &EscrowId) -> Result<(), LockstepError> {
        self.escrows.remove(escrow_id.key_bytes()).map_err(storage_err)?;
        Ok(())
    }

    pub fn delete_reveal(&self, swap_id: &SwapId) -> Result<(), LockstepError> {
        self.reveals.remove(swap_id.as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    /// Undo ingestion above `to` after a deep reorg: delete the event log and
    /// dedup entries past the rewind point and move the cursor back. Returns
    /// the removed events in on-chain order so the caller can reconcile the
    /// swaps they touched.
    pub fn rewind(&self, ledger: LedgerId, to: Cursor) -> Result<Vec<ChainEvent>, LockstepError> {
        let mut removed = Vec::new();
        // The log is small relative to ledger history (it is pruned with its
        // swaps), so a prefix scan is fine here.
        for item in self.events.scan_prefix([ledger.as_byte()]) {
            let (key, bytes) = item.map_err(storage_err)?;
            let event: ChainEvent = de(&bytes)?;
            if event.cursor() > to {
                self.events.remove(key).map_err(storage_err)?;
                self.seen.remove(event.dedup_key()).map_err(storage_err)?;
                removed.push(event);
            }
        }
        self.cursors
            .insert([ledger.as_byte()], ser(&to)?)
            .map_err(storage_err)?;
        Ok(removed)
    }

    // ── Maintenance ──────────────────────────────────────────────────────────

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), LockstepError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }
}

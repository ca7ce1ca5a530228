use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use lockstep_chain::{backoff_delay_ms, ChainAdapter, ChainError};
use lockstep_core::config::Config;
use lockstep_core::constants::{TimeoutProfile, MAX_CONFLICT_RETRIES, NOT_EXPIRED_RETRY_MS};
use lockstep_core::error::LockstepError;
use lockstep_core::escrow::Escrow;
use lockstep_core::swap::{Swap, SwapPhase, SwapRole};
use lockstep_core::types::{Amount, Clock, LedgerId, Secret, SwapId, TimestampMs};
use lockstep_store::SwapStore;

use crate::scheduler::{RateLimiter, TimerWheel};

/// Upper bound on single-step transitions per evaluation call; a correct
/// machine reaches quiescence in far fewer.
const MAX_STEPS_PER_EVALUATION: u32 = 16;

// ── Policy ───────────────────────────────────────────────────────────────────

/// Everything the state machine needs to judge a swap, resolved once at
/// startup from the process configuration.
#[derive(Clone, Debug)]
pub struct EnginePolicy {
    pub profile: TimeoutProfile,
    pub min_amount: Amount,
    pub max_amount: Amount,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub retention_ms: i64,
    pub local_address_a: String,
    pub local_address_b: String,
}

impl EnginePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            profile: config.profile(),
            min_amount: config.min_amount,
            max_amount: config.max_amount,
            max_attempts: config.max_attempts,
            base_backoff_ms: config.base_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            retention_ms: config.retention_ms,
            local_address_a: config.ledger_a.local_address.clone(),
            local_address_b: config.ledger_b.local_address.clone(),
        }
    }

    fn local_address(&self, ledger: LedgerId) -> &str {
        match ledger {
            LedgerId::A => &self.local_address_a,
            LedgerId::B => &self.local_address_b,
        }
    }

    /// Refunds are only driven for escrows this coordinator locked.
    fn owns(&self, escrow: &Escrow) -> bool {
        escrow.owner == self.local_address(escrow.escrow_id.ledger)
    }
}

enum Step {
    /// State advanced; evaluate again for the next transition.
    Again,
    /// Quiescent until the next signal or timer.
    Done,
}

// ── Engine ───────────────────────────────────────────────────────────────────

/// Per-swap state machine driver.
///
/// Each evaluation applies at most one phase transition, persists it under
/// the swap's optimistic version, and loops; a concurrent writer causes a
/// reload-and-re-decide. Callers must hold the swap's keyed lock (see
/// [`crate::scheduler::KeyedLocks`]) so at most one evaluation runs per swap
/// per process.
pub struct SwapEngine {
    store: Arc<SwapStore>,
    clock: Arc<dyn Clock>,
    chain_a: Arc<dyn ChainAdapter>,
    chain_b: Arc<dyn ChainAdapter>,
    limiter_a: RateLimiter,
    limiter_b: RateLimiter,
    timers: Arc<TimerWheel>,
    policy: EnginePolicy,
    incidents: AtomicU64,
}

impl SwapEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SwapStore>,
        clock: Arc<dyn Clock>,
        chain_a: Arc<dyn ChainAdapter>,
        chain_b: Arc<dyn ChainAdapter>,
        limiter_a: RateLimiter,
        limiter_b: RateLimiter,
        timers: Arc<TimerWheel>,
        policy: EnginePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            chain_a,
            chain_b,
            limiter_a,
            limiter_b,
            timers,
            policy,
            incidents: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    /// Incidents needing an operator: invalid reveals, unrecoverable failures.
    pub fn incident_count(&self) -> u64 {
        self.incidents.load(Ordering::Relaxed)
    }

    fn chain(&self, ledger: LedgerId) -> &Arc<dyn ChainAdapter> {
        match ledger {
            LedgerId::A => &self.chain_a,
            LedgerId::B => &self.chain_b,
        }
    }

    async fn throttle(&self, ledger: LedgerId) {
        match ledger {
            LedgerId::A => self.limiter_a.acquire().await,
            LedgerId::B => self.limiter_b.acquire().await,
        }
    }

    // ── Entry point ──────────────────────────────────────────────────────────

    /// Drive the swap until quiescent. Version conflicts reload and
    /// re-decide; other errors are logged and left for the next signal.
    pub async fn evaluate(&self, swap_id: SwapId) {
        let mut conflicts = 0;
        for _ in 0..MAX_STEPS_PER_EVALUATION {
            match self.evaluate_once(swap_id).await {
                Ok(Step::Again) => continue,
                Ok(Step::Done) => return,
                Err(LockstepError::VersionConflict { .. }) => {
                    conflicts += 1;
                    if conflicts > MAX_CONFLICT_RETRIES {
                        warn!(swap_id = %swap_id, "giving up after repeated version conflicts");
                        return;
                    }
                }
                Err(e) => {
                    warn!(swap_id = %swap_id, error = %e, code = e.code(), "evaluation failed");
                    return;
                }
            }
        }
        warn!(swap_id = %swap_id, "evaluation exceeded step budget; deferring");
    }

    async fn evaluate_once(&self, swap_id: SwapId) -> Result<Step, LockstepError> {
        let Some(mut swap) = self.store.get_swap(&swap_id)? else {
            debug!(swap_id = %swap_id, "signal for unknown swap ignored");
            return Ok(Step::Done);
        };
        if swap.is_terminal() {
            return Ok(Step::Done);
        }

        let now = self.clock.now_ms();
        let expected = swap.version;
        let escrow_a = self.load_escrow(&swap, LedgerId::A)?;
        let escrow_b = self.load_escrow(&swap, LedgerId::B)?;
        let reveal = self.store.get_reveal(&swap_id)?;

        // Ambiguous pairings are paused for the operator; the only permitted
        // automation is an explicit force-refund.
        if swap.ambiguous && !swap.force_refund {
            if swap.last_error.is_none() {
                swap.last_error = Some(LockstepError::AmbiguousPairing(swap.digest.to_hex()).code().into());
                swap.touch(now);
                self.store.upsert_swap(&mut swap, Some(expected))?;
            }
            return Ok(Step::Done);
        }

        // Operator override: refund whatever is refundable, bypassing the
        // phase rules below (ownership and deadlines still apply — the
        // ledgers enforce both anyway).
        if swap.force_refund {
            return self.drive_refunds(swap, expected, escrow_a, escrow_b, now).await;
        }

        match swap.phase {
            SwapPhase::Pending if swap.sides_count() >= 1 => {
                self.advance_to_one_side_locked(swap, expected, &escrow_a, &escrow_b, now)
            }
            SwapPhase::OneSideLocked if swap.has_both_sides() => {
                self.advance_to_both_locked(swap, expected, &escrow_a, &escrow_b, now)
            }
            SwapPhase::BothLocked if reveal.is_some() => {
                self.advance_phase(swap, expected, SwapPhase::Revealed, now)
            }
            SwapPhase::Revealed => {
                self.drive_reveal(swap, expected, escrow_a, escrow_b, reveal, now).await
            }
            _ => {
                // No reveal-driven work. Expiry is the remaining concern.
                if self.deadline_crossed(&swap, now) {
                    self.drive_refunds(swap, expected, escrow_a, escrow_b, now).await
                } else {
                    // Quiescent: make sure a deadline timer is armed.
                    if let Some(wake) = swap.next_wake_ms() {
                        self.timers.schedule(swap.swap_id, wake);
                    }
                    Ok(Step::Done)
                }
            }
        }
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    fn advance_phase(
        &self,
        mut swap: Swap,
        expected: u64,
        to: SwapPhase,
        now: TimestampMs,
    ) -> Result<Step, LockstepError> {
        info!(swap_id = %swap.swap_id, from = %swap.phase, to = %to, "phase transition");
        swap.phase = to;
        swap.touch(now);
        self.store.upsert_swap(&mut swap, Some(expected))?;
        Ok(Step::Again)
    }

    fn advance_to_one_side_locked(
        &self,
        swap: Swap,
        expected: u64,
        escrow_a: &Option<Escrow>,
        escrow_b: &Option<Escrow>,
        now: TimestampMs,
    ) -> Result<Step, LockstepError> {
        for escrow in [escrow_a, escrow_b].into_iter().flatten() {
            if let Err(violation) = self.check_side_policy(&swap, escrow, now) {
                return self.fail(swap, expected, violation, now);
            }
        }
        self.advance_phase(swap, expected, SwapPhase::OneSideLocked, now)
    }

    fn advance_to_both_locked(
        &self,
        mut swap: Swap,
        expected: u64,
        escrow_a: &Option<Escrow>,
        escrow_b: &Option<Escrow>,
        now: TimestampMs,
    ) -> Result<Step, LockstepError> {
        let (Some(a), Some(b)) = (escrow_a.as_ref(), escrow_b.as_ref()) else {
            // Sides attached but a snapshot is missing; wait for ingestion.
            return Ok(Step::Done);
        };
        if let Err(violation) = self.check_pairing(&swap, a, b, now) {
            return self.fail(swap, expected, violation, now);
        }

        // The later deadline belongs to the initiator's side.
        let (a_role, b_role) = if a.deadline_ms() >= b.deadline_ms() {
            (SwapRole::Initiator, SwapRole::Counterparty)
        } else {
            (SwapRole::Counterparty, SwapRole::Initiator)
        };
        if let Some(side) = swap.side_mut(LedgerId::A) {
            side.role = Some(a_role);
        }
        if let Some(side) = swap.side_mut(LedgerId::B) {
            side.role = Some(b_role);
        }

        if let Some(wake) = swap.earliest_deadline_ms() {
            self.timers.schedule(swap.swap_id, wake);
        }
        self.advance_phase(swap, expected, SwapPhase::BothLocked, now)
    }

    /// Single-side sanity: amounts within bounds, algorithm matches the
    /// swap's pinned one, deadline far enough out to act on.
    fn check_side_policy(
        &self,
        swap: &Swap,
        escrow: &Escrow,
        now: TimestampMs,
    ) -> Result<(), LockstepError> {
        if escrow.algo != swap.algo {
            return Err(LockstepError::MixedAlgorithm {
                a: algo_name(swap.algo),
                b: algo_name(escrow.algo),
            });
        }
        if escrow.amount < self.policy.min_amount || escrow.amount > self.policy.max_amount {
            return Err(LockstepError::AmountOutOfBounds {
                amount: escrow.amount,
                min: self.policy.min_amount,
                max: self.policy.max_amount,
            });
        }
        if !escrow.is_terminal() && escrow.deadline_ms() < now + self.policy.profile.min_timeout_ms {
            return Err(LockstepError::DeadlineTooSoon {
                deadline_ms: escrow.deadline_ms(),
                min_ms: self.policy.profile.min_timeout_ms,
            });
        }
        Ok(())
    }

    /// Cross-side invariants at pairing time: one escrow per ledger (the
    /// correlator guarantees slots), identical algorithm, and a deadline
    /// spread of at least the safety margin.
    fn check_pairing(
        &self,
        swap: &Swap,
        a: &Escrow,
        b: &Escrow,
        now: TimestampMs,
    ) -> Result<(), LockstepError> {
        if a.algo != b.algo {
            return Err(LockstepError::MixedAlgorithm {
                a: algo_name(a.algo),
                b: algo_name(b.algo),
            });
        }
        self.check_side_policy(swap, a, now)?;
        self.check_side_policy(swap, b, now)?;

        let spread = (a.deadline_ms() - b.deadline_ms()).abs();
        if spread < self.policy.profile.safety_margin_ms {
            return Err(LockstepError::SafetyMarginViolation {
                spread_ms: spread,
                margin_ms: self.policy.profile.safety_margin_ms,
            });
        }
        Ok(())
    }

    // ── Reveal propagation ───────────────────────────────────────────────────

    async fn drive_reveal(
        &self,
        mut swap: Swap,
        expected: u64,
        escrow_a: Option<Escrow>,
        escrow_b: Option<Escrow>,
        reveal: Option<lockstep_core::swap::Reveal>,
        now: TimestampMs,
    ) -> Result<Step, LockstepError> {
        let Some(reveal) = reveal else {
            // Revealed without a reveal record cannot happen through the
            // correlator; reload on the next signal rather than guessing.
            warn!(swap_id = %swap.swap_id, "phase Revealed but no reveal stored");
            return Ok(Step::Done);
        };

        // Re-verify before acting: the counterparty may have revealed under
        // a different algorithm or a garbage preimage.
        if !lockstep_crypto::verify(&reveal.secret, &swap.digest, swap.algo) {
            self.incidents.fetch_add(1, Ordering::Relaxed);
            return self.fail(swap, expected, LockstepError::RevealMismatch, now);
        }

        // Completed once both sides observably show withdrawn.
        let a_withdrawn = escrow_a.as_ref().map_or(false, |e| e.withdrawn);
        let b_withdrawn = escrow_b.as_ref().map_or(false, |e| e.withdrawn);
        if a_withdrawn && b_withdrawn {
            swap.retry_at_ms = None;
            swap.retry_count = 0;
            return self.complete(swap, expected, now);
        }

        // A refunded side after a reveal can never complete; the margin
        // should make this impossible, so it is an incident.
        if [&escrow_a, &escrow_b].iter().any(|e| e.as_ref().map_or(false, |e| e.refunded)) {
            self.incidents.fetch_add(1, Ordering::Relaxed);
            return self.fail(
                swap,
                expected,
                LockstepError::Other("side refunded after reveal; swap cannot complete".into()),
                now,
            );
        }

        // Drive the complementary withdraw for every still-open side.
        for escrow in [escrow_a, escrow_b].into_iter().flatten() {
            if escrow.is_terminal() {
                continue;
            }
            match self.submit_withdraw(&escrow, &reveal.secret).await {
                Ok(()) => {
                    swap.retry_count = 0;
                    swap.retry_at_ms = None;
                }
                Err(ChainError::AlreadyProcessed) => {
                    // Someone else (or the contract's auto-claim) got there
                    // first with the same preimage. That is success.
                    debug!(escrow_id = %escrow.escrow_id, "withdraw already processed");
                    self.absorb_withdrawn(&escrow, &reveal.secret).await?;
                    swap.retry_count = 0;
                    swap.retry_at_ms = None;
                }
                Err(ChainError::InvalidSecret) => {
                    self.incidents.fetch_add(1, Ordering::Relaxed);
                    return self.fail(swap, expected, LockstepError::RevealMismatch, now);
                }
                Err(e) if e.is_retryable() => {
                    return self.schedule_retry(swap, expected, e, now);
                }
                Err(e) => {
                    self.incidents.fetch_add(1, Ordering::Relaxed);
                    return self.fail(
                        swap,
                        expected,
                        LockstepError::Other(format!("withdraw failed: {e}")),
                        now,
                    );
                }
            }
        }

        swap.touch(now);
        self.store.upsert_swap(&mut swap, Some(expected))?;
        Ok(Step::Again)
    }

    /// Submit, wait for finality, refresh the stored snapshot.
    async fn submit_withdraw(&self, escrow: &Escrow, secret: &Secret) -> Result<(), ChainError> {
        let ledger = escrow.escrow_id.ledger;
        self.throttle(ledger).await;
        let tx_ref = self.chain(ledger).withdraw(&escrow.escrow_id, secret).await?;
        if let Err(e) = self.chain(ledger).submit_and_wait(&tx_ref).await {
            warn!(escrow_id = %escrow.escrow_id, error = %e, "confirmation wait failed");
        }
        info!(escrow_id = %escrow.escrow_id, tx_ref = %tx_ref, "withdraw submitted");
        self.absorb_withdrawn(escrow, secret).await.map_err(|e| {
            ChainError::Gateway(format!("snapshot refresh failed: {e}"))
        })
    }

    /// Refresh a snapshot after a (possibly external) withdrawal. A vanished
    /// escrow is equivalent to terminal: some ledgers destroy the object on
    /// completion.
    async fn absorb_withdrawn(&self, escrow: &Escrow, secret: &Secret) -> Result<(), LockstepError> {
        let ledger = escrow.escrow_id.ledger;
        match self.chain(ledger).get_escrow(&escrow.escrow_id).await {
            Ok(fresh) => self.store.put_escrow(&fresh),
            Err(e) => {
                if !matches!(e, ChainError::NotFound(_)) {
                    warn!(escrow_id = %escrow.escrow_id, error = %e, "snapshot refresh failed");
                }
                let mut stored = escrow.clone();
                stored.withdrawn = true;
                stored.revealed_secret = Some(secret.clone());
                self.store.put_escrow(&stored)
            }
        }
    }

    // ── Expiry ───────────────────────────────────────────────────────────────

    fn deadline_crossed(&self, swap: &Swap, now: TimestampMs) -> bool {
        swap.earliest_deadline_ms().map(|d| now > d).unwrap_or(false)
    }

    async fn drive_refunds(
        &self,
        mut swap: Swap,
        expected: u64,
        escrow_a: Option<Escrow>,
        escrow_b: Option<Escrow>,
        now: TimestampMs,
    ) -> Result<Step, LockstepError> {
        fn merge_wake(next_wake: &mut Option<TimestampMs>, at: TimestampMs) {
            *next_wake = Some(next_wake.map(|w| w.min(at)).unwrap_or(at));
        }
        let mut next_wake: Option<TimestampMs> = None;

        for escrow in [escrow_a.as_ref(), escrow_b.as_ref()].into_iter().flatten() {
            if escrow.is_terminal() {
                continue;
            }
            if !self.policy.owns(escrow) {
                // The counterparty refunds their own side.
                continue;
            }
            if now <= escrow.deadline_ms() {
                merge_wake(&mut next_wake, escrow.deadline_ms() + 1);
                continue;
            }

            let ledger = escrow.escrow_id.ledger;
            self.throttle(ledger).await;
            match self.chain(ledger).refund(&escrow.escrow_id).await {
                Ok(tx_ref) => {
                    info!(escrow_id = %escrow.escrow_id, tx_ref = %tx_ref, "refund submitted");
                    if let Err(e) = self.chain(ledger).submit_and_wait(&tx_ref).await {
                        warn!(escrow_id = %escrow.escrow_id, error = %e, "confirmation wait failed");
                    }
                    self.record_refund_attempt(&mut swap, escrow).await?;
                    swap.retry_count = 0;
                    swap.retry_at_ms = None;
                }
                Err(ChainError::AlreadyProcessed) | Err(ChainError::NotFound(_)) => {
                    // Refunded by the owner directly, or the escrow object is
                    // gone — both are terminal for our purposes.
                    self.record_refund_attempt(&mut swap, escrow).await?;
                }
                Err(ChainError::NotExpired) => {
                    // Ledger clock trails ours; not an attempt on record —
                    // reschedule and keep the swap non-terminal.
                    merge_wake(&mut next_wake, now + NOT_EXPIRED_RETRY_MS);
                }
                Err(e) if e.is_retryable() => {
                    return self.schedule_retry(swap, expected, e, now);
                }
                Err(e) => {
                    self.incidents.fetch_add(1, Ordering::Relaxed);
                    return self.fail(
                        swap,
                        expected,
                        LockstepError::Other(format!("refund failed: {e}")),
                        now,
                    );
                }
            }
        }

        // Reload snapshots to judge terminality.
        let escrow_a = self.load_escrow(&swap, LedgerId::A)?;
        let escrow_b = self.load_escrow(&swap, LedgerId::B)?;
        if self.expiry_settled(&swap, &escrow_a, &escrow_b, now) {
            swap.retry_at_ms = None;
            swap.retry_count = 0;
            swap.force_refund = false;
            info!(swap_id = %swap.swap_id, from = %swap.phase, to = %SwapPhase::Expired, "phase transition");
            swap.phase = SwapPhase::Expired;
            swap.touch(now);
            self.store.upsert_swap(&mut swap, Some(expected))?;
            return Ok(Step::Done);
        }

        if let Some(wake) = next_wake {
            swap.retry_at_ms = Some(wake);
            self.timers.schedule(swap.swap_id, wake);
        }
        swap.touch(now);
        self.store.upsert_swap(&mut swap, Some(expected))?;
        Ok(Step::Done)
    }

    async fn record_refund_attempt(
        &self,
        swap: &mut Swap,
        escrow: &Escrow,
    ) -> Result<(), LockstepError> {
        let ledger = escrow.escrow_id.ledger;
        if let Some(side) = swap.side_mut(ledger) {
            side.refund_attempted = true;
        }
        match self.chain(ledger).get_escrow(&escrow.escrow_id).await {
            Ok(fresh) => self.store.put_escrow(&fresh)?,
            Err(ChainError::NotFound(_)) => {
                let mut stored = escrow.clone();
                stored.refunded = true;
                self.store.put_escrow(&stored)?;
            }
            Err(e) => warn!(escrow_id = %escrow.escrow_id, error = %e, "snapshot refresh failed"),
        }
        Ok(())
    }

    /// A swap is `Expired` once every side this coordinator is responsible
    /// for is observably terminal, or past deadline with a refund attempt on
    /// record.
    fn expiry_settled(
        &self,
        swap: &Swap,
        escrow_a: &Option<Escrow>,
        escrow_b: &Option<Escrow>,
        now: TimestampMs,
    ) -> bool {
        let mut any_side = false;
        for (escrow, side) in [(escrow_a, &swap.a_side), (escrow_b, &swap.b_side)] {
            let Some(side) = side else { continue };
            any_side = true;
            let Some(escrow) = escrow else { continue };
            if escrow.is_terminal() {
                continue;
            }
            if !self.policy.owns(escrow) {
                // Not ours to refund; its deadline must still have passed.
                if now > escrow.deadline_ms() {
                    continue;
                }
                return false;
            }
            if now > escrow.deadline_ms() && side.refund_attempted {
                continue;
            }
            return false;
        }
        any_side
    }

    // ── Retry / failure bookkeeping ──────────────────────────────────────────

    fn schedule_retry(
        &self,
        mut swap: Swap,
        expected: u64,
        cause: ChainError,
        now: TimestampMs,
    ) -> Result<Step, LockstepError> {
        swap.retry_count += 1;
        if swap.retry_count >= self.policy.max_attempts {
            self.incidents.fetch_add(1, Ordering::Relaxed);
            return self.fail(
                swap,
                expected,
                LockstepError::Other(format!(
                    "retries exhausted after {} attempts: {cause}",
                    self.policy.max_attempts
                )),
                now,
            );
        }
        let delay =
            backoff_delay_ms(self.policy.base_backoff_ms, swap.retry_count - 1, self.policy.max_backoff_ms);
        let at = now + delay as i64;
        warn!(
            swap_id = %swap.swap_id,
            attempt = swap.retry_count,
            delay_ms = delay,
            cause = cause.code(),
            "transient failure; backing off"
        );
        swap.last_error = Some(cause.code().into());
        swap.retry_at_ms = Some(at);
        swap.touch(now);
        self.store.upsert_swap(&mut swap, Some(expected))?;
        self.timers.schedule(swap.swap_id, at);
        Ok(Step::Done)
    }

    fn fail(
        &self,
        mut swap: Swap,
        expected: u64,
        cause: LockstepError,
        now: TimestampMs,
    ) -> Result<Step, LockstepError> {
        error!(swap_id = %swap.swap_id, cause = %cause, code = cause.code(), "swap failed");
        swap.last_error = Some(format!("{}: {cause}", cause.code()));
        swap.phase = SwapPhase::Failed;
        swap.retry_at_ms = None;
        swap.touch(now);
        self.store.upsert_swap(&mut swap, Some(expected))?;
        Ok(Step::Done)
    }

    fn complete(&self, mut swap: Swap, expected: u64, now: TimestampMs) -> Result<Step, LockstepError> {
        info!(swap_id = %swap.swap_id, from = %swap.phase, to = %SwapPhase::Completed, "phase transition");
        swap.phase = SwapPhase::Completed;
        swap.last_error = None;
        swap.touch(now);
        self.store.upsert_swap(&mut swap, Some(expected))?;
        Ok(Step::Done)
    }

    fn load_escrow(&self, swap: &Swap, ledger: LedgerId) -> Result<Option<Escrow>, LockstepError> {
        match swap.side(ledger) {
            Some(side) => self.store.get_escrow(&side.escrow_id),
            None => Ok(None),
        }
    }

    // ── Operator actions ─────────────────────────────────────────────────────

    /// Flag a swap for refunds regardless of auto-policy. The refunds
    /// themselves still wait for each side's deadline.
    pub fn flag_force_refund(&self, swap_id: &SwapId) -> Result<Swap, LockstepError> {
        let now = self.clock.now_ms();
        for _ in 0..=MAX_CONFLICT_RETRIES {
            let Some(mut swap) = self.store.get_swap(swap_id)? else {
                return Err(LockstepError::UnknownSwap(swap_id.to_hex()));
            };
            if swap.is_terminal() {
                return Ok(swap);
            }
            let expected = swap.version;
            swap.force_refund = true;
            swap.touch(now);
            match self.store.upsert_swap(&mut swap, Some(expected)) {
                Ok(_) => {
                    self.timers.schedule(*swap_id, now);
                    return Ok(swap);
                }
                Err(LockstepError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(LockstepError::Other("force-refund lost every version race".into()))
    }

    // ── Retention sweep ──────────────────────────────────────────────────────

    /// Purge terminal swaps past the retention window. Returns how many were
    /// removed.
    pub fn sweep_retention(&self) -> Result<usize, LockstepError> {
        let horizon = self.clock.now_ms() - self.policy.retention_ms;
        let expired = self.store.terminal_swaps_updated_before(horizon)?;
        let count = expired.len();
        for swap in expired {
            debug!(swap_id = %swap.swap_id, phase = %swap.phase, "purging retained swap");
            self.store.purge_swap(&swap.swap_id)?;
        }
        Ok(count)
    }
}

fn algo_name(algo: lockstep_core::types::HashAlgo) -> &'static str {
    match algo {
        lockstep_core::types::HashAlgo::Keccak256 => "keccak256",
        lockstep_core::types::HashAlgo::Sha256 => "sha256",
    }
}

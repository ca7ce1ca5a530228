pub mod engine;
pub mod scheduler;
pub mod worker;

pub use engine::{EnginePolicy, SwapEngine};
pub use scheduler::{KeyedLocks, RateLimiter, TimerWheel};
pub use worker::spawn_workers;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use lockstep_chain::{ChainAdapter, ChainError, CreateEscrowParams, MemoryChain};
    use lockstep_core::constants::DEVNET_PROFILE;
    use lockstep_core::swap::{SwapPhase, SwapRole, SwapSignal};
    use lockstep_core::types::{
        Clock, Digest, EscrowId, HashAlgo, LedgerId, ManualClock, Secret, SwapId,
    };
    use lockstep_crypto::{digest as hash_digest, random_secret, verify};
    use lockstep_ingest::Correlator;
    use lockstep_store::SwapStore;

    use super::*;

    const T0: i64 = 1_000_000;
    const COORD_A: &str = "0xc00rd";
    const COORD_B: &str = "resolver-b";
    const ALICE_A: &str = "0xa11ce";
    const ALICE_B: &str = "alice-b";
    // Devnet profile: source 600_000ms, dest 120_000ms, margin 120_000ms,
    // min timeout 60_000ms.
    const SRC_DUR: i64 = DEVNET_PROFILE.source_deadline_ms;
    const DST_DUR: i64 = DEVNET_PROFILE.dest_deadline_ms;

    struct Rig {
        store: Arc<SwapStore>,
        clock: Arc<ManualClock>,
        chain_a: Arc<MemoryChain>,
        chain_b: Arc<MemoryChain>,
        engine: Arc<SwapEngine>,
        correlator: Arc<Correlator>,
        signals: mpsc::Receiver<SwapSignal>,
        path: PathBuf,
    }

    impl Drop for Rig {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    fn rig(tag: &str) -> Rig {
        let path = std::env::temp_dir().join(format!("lockstep_engine_{tag}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        let store = Arc::new(SwapStore::open(&path).unwrap());
        let clock = Arc::new(ManualClock::new(T0));
        let chain_a = Arc::new(MemoryChain::new(LedgerId::A, 1, COORD_A, clock.clone()));
        let chain_b = Arc::new(MemoryChain::new(LedgerId::B, 1, COORD_B, clock.clone()));
        let policy = EnginePolicy {
            profile: DEVNET_PROFILE,
            min_amount: 10,
            max_amount: u128::MAX,
            max_attempts: 3,
            base_backoff_ms: 10,
            max_backoff_ms: 50,
            retention_ms: 10_000,
            local_address_a: COORD_A.into(),
            local_address_b: COORD_B.into(),
        };
        let timers = Arc::new(TimerWheel::new(5));
        let engine = Arc::new(SwapEngine::new(
            Arc::clone(&store),
            clock.clone() as Arc<dyn Clock>,
            chain_a.clone() as Arc<dyn ChainAdapter>,
            chain_b.clone() as Arc<dyn ChainAdapter>,
            RateLimiter::new(1_000),
            RateLimiter::new(1_000),
            timers,
            policy,
        ));
        let (tx, rx) = mpsc::channel(64);
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&store),
            clock.clone() as Arc<dyn Clock>,
            tx,
        ));
        Rig { store, clock, chain_a, chain_b, engine, correlator, signals: rx, path }
    }

    impl Rig {
        /// Pull finalized events off both ledgers into the correlator, then
        /// run the engine for every signalled swap.
        async fn sync(&mut self) {
            for chain in [&self.chain_a, &self.chain_b] {
                let ledger = chain.ledger();
                let from = self.store.cursor(ledger).unwrap();
                let batch = chain.poll_events(from, 100).await.unwrap();
                for event in &batch.events {
                    self.correlator.apply_event(event).await.unwrap();
                }
            }
            let mut seen: Vec<SwapId> = Vec::new();
            while let Ok(signal) = self.signals.try_recv() {
                if !seen.contains(&signal.swap_id) {
                    seen.push(signal.swap_id);
                }
            }
            for swap_id in seen {
                self.engine.evaluate(swap_id).await;
            }
        }

        async fn evaluate_by_digest(&self, digest: &Digest) {
            let swap = self.store.swap_by_digest(digest).unwrap().unwrap();
            self.engine.evaluate(swap.swap_id).await;
        }

        fn phase(&self, digest: &Digest) -> SwapPhase {
            self.store.swap_by_digest(digest).unwrap().unwrap().phase
        }
    }

    fn escrow_params(
        digest: Digest,
        algo: HashAlgo,
        beneficiary: &str,
        amount: u128,
        duration_ms: i64,
    ) -> CreateEscrowParams {
        CreateEscrowParams {
            token: "native".into(),
            amount,
            digest,
            algo,
            beneficiary: beneficiary.into(),
            lock_duration_ms: duration_ms,
        }
    }

    /// Alice locks on A for the coordinator; the coordinator locks on B for
    /// Alice. Returns (digest, secret, A-escrow, B-escrow).
    fn lock_pair(r: &Rig) -> (Digest, Secret, EscrowId, EscrowId) {
        let secret = random_secret();
        let digest = hash_digest(&secret, HashAlgo::Sha256);
        let (a_id, _) = r
            .chain_a
            .create_escrow_as(ALICE_A, escrow_params(digest, HashAlgo::Sha256, COORD_A, 1_000, SRC_DUR))
            .unwrap();
        let (b_id, _) = r
            .chain_b
            .create_escrow_as(
                COORD_B,
                escrow_params(digest, HashAlgo::Sha256, ALICE_B, 1_000_000_000, DST_DUR),
            )
            .unwrap();
        (digest, secret, a_id, b_id)
    }

    // ── Locking and policy ───────────────────────────────────────────────────

    #[tokio::test]
    async fn pair_progresses_to_both_locked_with_roles() {
        let mut r = rig("both_locked");
        let (digest, _, _, _) = lock_pair(&r);
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::BothLocked);
        // Later deadline (the A side here) belongs to the initiator.
        assert_eq!(swap.a_side.as_ref().unwrap().role, Some(SwapRole::Initiator));
        assert_eq!(swap.b_side.as_ref().unwrap().role, Some(SwapRole::Counterparty));
    }

    #[tokio::test]
    async fn mixed_algorithm_pairing_is_rejected() {
        let mut r = rig("mixed_algo");
        let secret = random_secret();
        let digest = hash_digest(&secret, HashAlgo::Sha256);
        r.chain_a
            .create_escrow_as(ALICE_A, escrow_params(digest, HashAlgo::Sha256, COORD_A, 1_000, SRC_DUR))
            .unwrap();
        // Same digest value, but the B escrow pins Keccak-256.
        r.chain_b
            .create_escrow_as(COORD_B, escrow_params(digest, HashAlgo::Keccak256, ALICE_B, 1_000, DST_DUR))
            .unwrap();
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::Failed);
        assert!(swap.last_error.as_deref().unwrap().contains("mixed_algorithm"));
    }

    #[tokio::test]
    async fn safety_margin_violation_is_rejected() {
        let mut r = rig("margin");
        let secret = random_secret();
        let digest = hash_digest(&secret, HashAlgo::Sha256);
        r.chain_a
            .create_escrow_as(ALICE_A, escrow_params(digest, HashAlgo::Sha256, COORD_A, 1_000, SRC_DUR))
            .unwrap();
        // Spread of 40s is under the devnet 120s margin.
        r.chain_b
            .create_escrow_as(
                COORD_B,
                escrow_params(digest, HashAlgo::Sha256, ALICE_B, 1_000, SRC_DUR - 40_000),
            )
            .unwrap();
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::Failed);
        assert!(swap.last_error.as_deref().unwrap().contains("safety_margin"));
    }

    #[tokio::test]
    async fn amount_below_policy_floor_fails_the_swap() {
        let mut r = rig("amount_floor");
        let secret = random_secret();
        let digest = hash_digest(&secret, HashAlgo::Sha256);
        // 5 is below the policy floor of 10.
        r.chain_a
            .create_escrow_as(ALICE_A, escrow_params(digest, HashAlgo::Sha256, COORD_A, 5, SRC_DUR))
            .unwrap();
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::Failed);
        assert!(swap.last_error.as_deref().unwrap().contains("amount_bounds"));
    }

    // ── Reveal propagation (S1, S3, S4) ──────────────────────────────────────

    #[tokio::test]
    async fn reveal_drives_complementary_withdraw_to_completion() {
        let mut r = rig("happy_path");
        let (digest, secret, a_id, b_id) = lock_pair(&r);
        r.sync().await;
        assert_eq!(r.phase(&digest), SwapPhase::BothLocked);

        // Alice claims the B side, revealing the preimage on-chain.
        r.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::Completed);
        assert!(r.chain_a.escrow_snapshot(&a_id).unwrap().withdrawn);
        assert!(r.chain_b.escrow_snapshot(&b_id).unwrap().withdrawn);

        // Completed implies a preimage that hashes to the swap digest.
        let reveal = r.store.get_reveal(&swap.swap_id).unwrap().unwrap();
        assert!(verify(&reveal.secret, &swap.digest, swap.algo));
        assert_eq!(r.engine.incident_count(), 0);
    }

    #[tokio::test]
    async fn lost_withdraw_race_is_still_completion() {
        let mut r = rig("reveal_race");
        let (digest, secret, a_id, b_id) = lock_pair(&r);
        r.sync().await;

        // Alice reveals on B; another resolver beats us to the A-withdraw
        // with the same preimage.
        r.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();
        r.chain_a.withdraw_as("0xrival", &a_id, &secret).unwrap();

        r.sync().await;
        assert_eq!(r.phase(&digest), SwapPhase::Completed);
        assert_eq!(r.engine.incident_count(), 0);
    }

    #[tokio::test]
    async fn already_processed_withdraw_is_treated_as_success() {
        let mut r = rig("already_processed");
        let (digest, secret, a_id, b_id) = lock_pair(&r);
        r.sync().await;

        r.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();
        // A rival resolver completes A on-chain; we evaluate before that
        // event reaches us, so our own submit bounces off idempotency.
        r.chain_a.withdraw_as("0xrival", &a_id, &secret).unwrap();
        let from = r.store.cursor(LedgerId::B).unwrap();
        let batch = r.chain_b.poll_events(from, 100).await.unwrap();
        for event in &batch.events {
            r.correlator.apply_event(event).await.unwrap();
        }
        r.evaluate_by_digest(&digest).await;

        assert_eq!(r.phase(&digest), SwapPhase::Completed);
        assert_eq!(r.engine.incident_count(), 0);
    }

    #[tokio::test]
    async fn invalid_reveal_fails_the_swap_and_opens_an_incident() {
        let mut r = rig("invalid_secret");
        let (digest, _secret, _a_id, b_id) = lock_pair(&r);
        r.sync().await;

        // The B gateway releases against a preimage that does not hash to
        // the shared digest (algorithm confusion on the counterparty side).
        let garbage = random_secret();
        r.chain_b.withdraw_unchecked_as(ALICE_B, &b_id, &garbage).unwrap();
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::Failed);
        assert!(swap.last_error.as_deref().unwrap().contains("reveal_mismatch"));
        assert_eq!(r.engine.incident_count(), 1);
    }

    #[tokio::test]
    async fn adapter_invalid_secret_is_not_retried() {
        let mut r = rig("adapter_invalid");
        let (digest, secret, _a_id, b_id) = lock_pair(&r);
        r.sync().await;

        r.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();
        // The gateway rejects our A-withdraw even though the preimage checks
        // out locally (contract-side policy divergence).
        r.chain_a.inject_withdraw_error(ChainError::InvalidSecret);
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::Failed);
        assert_eq!(swap.retry_count, 0, "InvalidSecret must not be retried");
        assert_eq!(r.engine.incident_count(), 1);
    }

    #[tokio::test]
    async fn transient_withdraw_errors_back_off_then_exhaust_to_failed() {
        let mut r = rig("retry_backoff");
        let (digest, secret, _a_id, b_id) = lock_pair(&r);
        r.sync().await;

        r.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();
        r.chain_a.inject_withdraw_error(ChainError::Unavailable("rpc down".into()));
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::Revealed);
        assert_eq!(swap.retry_count, 1);
        assert!(swap.retry_at_ms.is_some(), "backoff timer must be armed");

        // Second transient failure...
        r.chain_a.inject_withdraw_error(ChainError::Timeout);
        r.evaluate_by_digest(&digest).await;
        assert_eq!(r.store.swap_by_digest(&digest).unwrap().unwrap().retry_count, 2);

        // ...and the third exhausts max_attempts.
        r.chain_a.inject_withdraw_error(ChainError::Unavailable("still down".into()));
        r.evaluate_by_digest(&digest).await;
        assert_eq!(r.phase(&digest), SwapPhase::Failed);
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let mut r = rig("retry_recover");
        let (digest, secret, _a_id, b_id) = lock_pair(&r);
        r.sync().await;

        r.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();
        r.chain_a.inject_withdraw_error(ChainError::Timeout);
        r.sync().await;
        assert_eq!(r.phase(&digest), SwapPhase::Revealed);

        // The injected fault is gone; the timer-driven re-evaluation lands it.
        r.evaluate_by_digest(&digest).await;
        assert_eq!(r.phase(&digest), SwapPhase::Completed);
    }

    // ── Expiry (S2) ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unrevealed_swap_refunds_each_side_at_its_deadline() {
        let mut r = rig("expiry");
        // The coordinator owns both locks here, as the resolver does when it
        // provided liquidity on both ledgers.
        let secret = random_secret();
        let digest = hash_digest(&secret, HashAlgo::Sha256);
        let (a_id, _) = r
            .chain_a
            .create_escrow_as(COORD_A, escrow_params(digest, HashAlgo::Sha256, ALICE_A, 1_000, SRC_DUR))
            .unwrap();
        let (b_id, _) = r
            .chain_b
            .create_escrow_as(COORD_B, escrow_params(digest, HashAlgo::Sha256, ALICE_B, 1_000, DST_DUR))
            .unwrap();
        r.sync().await;
        assert_eq!(r.phase(&digest), SwapPhase::BothLocked);

        // Past the B (earlier) deadline only: B refunds, A stays locked.
        r.clock.set(T0 + DST_DUR + 1_000);
        r.evaluate_by_digest(&digest).await;
        assert!(r.chain_b.escrow_snapshot(&b_id).unwrap().refunded);
        assert!(!r.chain_a.escrow_snapshot(&a_id).unwrap().refunded);
        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert!(!swap.is_terminal(), "A side is still locked");
        assert!(swap.b_side.as_ref().unwrap().refund_attempted);

        // Past the A deadline: both refunded, swap expired.
        r.clock.set(T0 + SRC_DUR + 1_000);
        r.evaluate_by_digest(&digest).await;
        assert!(r.chain_a.escrow_snapshot(&a_id).unwrap().refunded);
        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert_eq!(swap.phase, SwapPhase::Expired);
        assert!(swap.a_side.as_ref().unwrap().refund_attempted);
    }

    #[tokio::test]
    async fn counterparty_owned_sides_are_left_alone() {
        let mut r = rig("expiry_unowned");
        let (digest, _secret, a_id, b_id) = lock_pair(&r);
        r.sync().await;

        r.clock.set(T0 + SRC_DUR + 1_000);
        r.evaluate_by_digest(&digest).await;

        // Alice owns the A escrow; only our own B lock is refunded.
        assert!(!r.chain_a.escrow_snapshot(&a_id).unwrap().refunded);
        assert!(r.chain_b.escrow_snapshot(&b_id).unwrap().refunded);
        assert_eq!(r.phase(&digest), SwapPhase::Expired);
    }

    #[tokio::test]
    async fn not_expired_refusal_reschedules_without_terminal_phase() {
        let mut r = rig("not_expired");
        let secret = random_secret();
        let digest = hash_digest(&secret, HashAlgo::Sha256);
        r.chain_a
            .create_escrow_as(COORD_A, escrow_params(digest, HashAlgo::Sha256, ALICE_A, 1_000, SRC_DUR))
            .unwrap();
        r.chain_b
            .create_escrow_as(COORD_B, escrow_params(digest, HashAlgo::Sha256, ALICE_B, 1_000, DST_DUR))
            .unwrap();
        r.sync().await;

        r.clock.set(T0 + DST_DUR + 1_000);
        // The ledger disagrees about expiry (clock skew).
        r.chain_b.inject_refund_error(ChainError::NotExpired);
        r.evaluate_by_digest(&digest).await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert!(!swap.is_terminal());
        assert!(!swap.b_side.as_ref().unwrap().refund_attempted);
        assert!(swap.retry_at_ms.is_some(), "rescheduled near the deadline");
    }

    // ── Ambiguity and operator override ──────────────────────────────────────

    #[tokio::test]
    async fn ambiguous_swaps_are_paused_until_forced() {
        let mut r = rig("ambiguous_force");
        let (digest, _secret, _a_id, b_id) = lock_pair(&r);
        // A third escrow on the same digest poisons the pairing.
        r.chain_a
            .create_escrow_as("0xeve", escrow_params(digest, HashAlgo::Sha256, "0xeve2", 500, SRC_DUR))
            .unwrap();
        r.sync().await;

        let swap = r.store.swap_by_digest(&digest).unwrap().unwrap();
        assert!(swap.ambiguous);
        assert!(!swap.is_terminal(), "ambiguous swaps wait for an operator");

        // Deadlines lapse; automation stays paused.
        r.clock.set(T0 + SRC_DUR + 1_000);
        r.evaluate_by_digest(&digest).await;
        assert!(!r.chain_b.escrow_snapshot(&b_id).unwrap().refunded);

        // Operator force-refund drives our side out.
        r.engine.flag_force_refund(&swap.swap_id).unwrap();
        r.evaluate_by_digest(&digest).await;
        assert!(r.chain_b.escrow_snapshot(&b_id).unwrap().refunded);
        assert_eq!(r.phase(&digest), SwapPhase::Expired);
    }

    // ── Retention ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn retention_sweep_purges_terminal_swaps() {
        let mut r = rig("retention");
        let (digest, secret, _a_id, b_id) = lock_pair(&r);
        r.sync().await;
        r.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();
        r.sync().await;
        assert_eq!(r.phase(&digest), SwapPhase::Completed);

        // Within retention: kept.
        assert_eq!(r.engine.sweep_retention().unwrap(), 0);

        r.clock.advance(10_000 + 1_000);
        assert_eq!(r.engine.sweep_retention().unwrap(), 1);
        assert!(r.store.swap_by_digest(&digest).unwrap().is_none());
    }

    #[tokio::test]
    async fn timer_rebuild_rearms_active_swaps() {
        let mut r = rig("rebuild");
        let (digest, _, _, _) = lock_pair(&r);
        r.sync().await;
        assert_eq!(r.phase(&digest), SwapPhase::BothLocked);

        // A fresh wheel (as after a restart) re-arms from the store scan.
        let wheel = TimerWheel::new(1_000);
        assert_eq!(wheel.rebuild(&r.store).unwrap(), 1);
    }
}

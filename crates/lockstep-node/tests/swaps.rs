//! End-to-end swap scenarios: a full coordinator (ingestors, correlator,
//! engine workers, timer wheel, operator RPC) over deterministic in-memory
//! ledgers and a manually-driven clock.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lockstep_chain::{ChainAdapter, CreateEscrowParams, MemoryChain};
use lockstep_core::config::{Config, LedgerConfig, Network};
use lockstep_core::constants::DEVNET_PROFILE;
use lockstep_core::swap::SwapPhase;
use lockstep_core::types::{Clock, Digest, HashAlgo, LedgerId, ManualClock, Secret};
use lockstep_crypto::{digest as hash_digest, random_secret, verify};
use lockstep_node::Coordinator;
use lockstep_store::SwapStore;

const T0: i64 = 1_000_000;
const COORD_A: &str = "0xc00rd";
const COORD_B: &str = "resolver-b";
const ALICE_A: &str = "0xa11ce";
const ALICE_B: &str = "alice-b";
const SRC_DUR: i64 = DEVNET_PROFILE.source_deadline_ms;
const DST_DUR: i64 = DEVNET_PROFILE.dest_deadline_ms;

struct World {
    clock: Arc<ManualClock>,
    chain_a: Arc<MemoryChain>,
    chain_b: Arc<MemoryChain>,
    store: Arc<SwapStore>,
    coordinator: Coordinator,
    path: PathBuf,
}

impl Drop for World {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

fn devnet_config(store_path: &std::path::Path) -> Config {
    Config {
        network: Network::Devnet,
        store_path: store_path.to_path_buf(),
        ledger_a: LedgerConfig {
            poll_interval_ms: 100,
            local_address: COORD_A.into(),
            ..LedgerConfig::with_defaults(LedgerId::A)
        },
        ledger_b: LedgerConfig {
            poll_interval_ms: 100,
            local_address: COORD_B.into(),
            ..LedgerConfig::with_defaults(LedgerId::B)
        },
        max_attempts: 4,
        base_backoff_ms: 50,
        max_backoff_ms: 500,
        retention_ms: 60_000,
        fee_bps: 0,
        min_amount: 1,
        max_amount: u128::MAX,
        worker_count: 4,
        event_batch: 64,
        rpc_listen: "127.0.0.1:0".into(),
    }
}

async fn world(tag: &str) -> World {
    let path = std::env::temp_dir().join(format!("lockstep_e2e_{tag}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&path);
    let config = devnet_config(&path);

    let clock = Arc::new(ManualClock::new(T0));
    let chain_a = Arc::new(MemoryChain::new(LedgerId::A, 1, COORD_A, clock.clone()));
    let chain_b = Arc::new(MemoryChain::new(LedgerId::B, 1, COORD_B, clock.clone()));
    let store = Arc::new(SwapStore::open(&path).unwrap());

    let mut coordinator = Coordinator::new(
        config,
        Arc::clone(&store),
        clock.clone() as Arc<dyn Clock>,
        chain_a.clone() as Arc<dyn ChainAdapter>,
        chain_b.clone() as Arc<dyn ChainAdapter>,
    )
    .unwrap();
    coordinator.start().await.unwrap();

    World { clock, chain_a, chain_b, store, coordinator, path }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

fn escrow_params(
    digest: Digest,
    beneficiary: &str,
    amount: u128,
    duration_ms: i64,
) -> CreateEscrowParams {
    CreateEscrowParams {
        token: "native".into(),
        amount,
        digest,
        algo: HashAlgo::Sha256,
        beneficiary: beneficiary.into(),
        lock_duration_ms: duration_ms,
    }
}

/// Alice locks for the coordinator on A; the coordinator has locked for
/// Alice on B. Standard resolver topology.
fn lock_pair(w: &World) -> (Digest, Secret, lockstep_core::types::EscrowId, lockstep_core::types::EscrowId) {
    let secret = random_secret();
    let digest = hash_digest(&secret, HashAlgo::Sha256);
    let (a_id, _) = w
        .chain_a
        .create_escrow_as(ALICE_A, escrow_params(digest, COORD_A, 1_000, SRC_DUR))
        .unwrap();
    let (b_id, _) = w
        .chain_b
        .create_escrow_as(COORD_B, escrow_params(digest, ALICE_B, 1_000_000_000, DST_DUR))
        .unwrap();
    (digest, secret, a_id, b_id)
}

fn phase(w: &World, digest: &Digest) -> Option<SwapPhase> {
    w.store.swap_by_digest(digest).unwrap().map(|s| s.phase)
}

// ── S1: happy path ───────────────────────────────────────────────────────────

#[tokio::test]
async fn s1_reveal_completes_both_sides() {
    let mut w = world("s1").await;
    let (digest, secret, a_id, b_id) = lock_pair(&w);

    wait_until("both sides locked", || phase(&w, &digest) == Some(SwapPhase::BothLocked)).await;

    // Alice claims on B, revealing the preimage.
    w.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();

    wait_until("swap completed", || phase(&w, &digest) == Some(SwapPhase::Completed)).await;
    assert!(w.chain_a.escrow_snapshot(&a_id).unwrap().withdrawn);
    assert!(w.chain_b.escrow_snapshot(&b_id).unwrap().withdrawn);

    // Completed implies a verifying preimage on record.
    let swap = w.store.swap_by_digest(&digest).unwrap().unwrap();
    let reveal = w.store.get_reveal(&swap.swap_id).unwrap().unwrap();
    assert!(verify(&reveal.secret, &digest, HashAlgo::Sha256));

    w.coordinator.stop().await;
}

// ── S2: never revealed, both sides refund ────────────────────────────────────

#[tokio::test]
async fn s2_unrevealed_swap_expires_with_refunds() {
    let mut w = world("s2").await;
    // The coordinator owns both locks in this scenario.
    let secret = random_secret();
    let digest = hash_digest(&secret, HashAlgo::Sha256);
    let (a_id, _) = w
        .chain_a
        .create_escrow_as(COORD_A, escrow_params(digest, ALICE_A, 1_000, SRC_DUR))
        .unwrap();
    let (b_id, _) = w
        .chain_b
        .create_escrow_as(COORD_B, escrow_params(digest, ALICE_B, 1_000, DST_DUR))
        .unwrap();

    wait_until("both sides locked", || phase(&w, &digest) == Some(SwapPhase::BothLocked)).await;

    // Cross the destination deadline first.
    w.clock.set(T0 + DST_DUR + 1_000);
    wait_until("B side refunded", || {
        w.chain_b.escrow_snapshot(&b_id).unwrap().refunded
    })
    .await;
    assert!(!w.chain_a.escrow_snapshot(&a_id).unwrap().refunded);

    // Then the source deadline.
    w.clock.set(T0 + SRC_DUR + 1_000);
    wait_until("swap expired", || phase(&w, &digest) == Some(SwapPhase::Expired)).await;
    assert!(w.chain_a.escrow_snapshot(&a_id).unwrap().refunded);

    w.coordinator.stop().await;
}

// ── S3: reveal race, rival resolver wins the A-withdraw ──────────────────────

#[tokio::test]
async fn s3_lost_withdraw_race_still_completes() {
    let mut w = world("s3").await;
    let (digest, secret, a_id, b_id) = lock_pair(&w);

    wait_until("both sides locked", || phase(&w, &digest) == Some(SwapPhase::BothLocked)).await;

    w.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();
    // A rival lands the same preimage on A before we do.
    w.chain_a.withdraw_as("0xrival", &a_id, &secret).unwrap();

    wait_until("swap completed", || phase(&w, &digest) == Some(SwapPhase::Completed)).await;
    assert_eq!(w.coordinator.engine().incident_count(), 0);

    w.coordinator.stop().await;
}

// ── S4: counterparty reveals garbage ─────────────────────────────────────────

#[tokio::test]
async fn s4_invalid_reveal_fails_and_alerts() {
    let mut w = world("s4").await;
    let (digest, _secret, a_id, b_id) = lock_pair(&w);

    wait_until("both sides locked", || phase(&w, &digest) == Some(SwapPhase::BothLocked)).await;

    // The B contract releases against a preimage that does not hash to the
    // shared digest under the pinned algorithm.
    let garbage = random_secret();
    w.chain_b.withdraw_unchecked_as(ALICE_B, &b_id, &garbage).unwrap();

    wait_until("swap failed", || phase(&w, &digest) == Some(SwapPhase::Failed)).await;
    assert!(!w.chain_a.escrow_snapshot(&a_id).unwrap().withdrawn, "A side must stay locked");
    assert!(w.coordinator.engine().incident_count() >= 1, "operator must be alerted");

    w.coordinator.stop().await;
}

// ── S5: deep reorg wipes a creation ──────────────────────────────────────────

#[tokio::test]
async fn s5_deep_reorg_unwinds_the_swap() {
    let mut w = world("s5").await;
    let secret = random_secret();
    let digest = hash_digest(&secret, HashAlgo::Sha256);
    w.chain_a
        .create_escrow_as(ALICE_A, escrow_params(digest, COORD_A, 1_000, SRC_DUR))
        .unwrap();

    wait_until("swap ingested", || w.store.swap_by_digest(&digest).unwrap().is_some()).await;

    // The creation never happened on the canonical chain.
    w.chain_a.reorg_to(0);

    wait_until("swap unwound", || w.store.swap_by_digest(&digest).unwrap().is_none()).await;
    let rewinds = w
        .coordinator
        .status(LedgerId::A)
        .cursor_rewinds
        .load(std::sync::atomic::Ordering::Relaxed);
    assert!(rewinds >= 1, "rewind must be counted");

    w.coordinator.stop().await;
}

// ── S6: two coordinators share one store ─────────────────────────────────────

#[tokio::test]
async fn s6_two_coordinators_complete_exactly_once() {
    let mut w = world("s6").await;
    // Second instance on the same store and ledgers.
    let mut second = Coordinator::new(
        devnet_config(&w.path),
        w.store.clone(),
        w.clock.clone() as Arc<dyn Clock>,
        w.chain_a.clone() as Arc<dyn ChainAdapter>,
        w.chain_b.clone() as Arc<dyn ChainAdapter>,
    )
    .unwrap();
    second.start().await.unwrap();

    let (digest, secret, a_id, b_id) = lock_pair(&w);
    wait_until("both sides locked", || phase(&w, &digest) == Some(SwapPhase::BothLocked)).await;

    w.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();

    wait_until("swap completed", || phase(&w, &digest) == Some(SwapPhase::Completed)).await;
    // The ledger accepted exactly one A-withdraw; the loser saw
    // AlreadyProcessed or a version conflict and reconciled.
    assert!(w.chain_a.escrow_snapshot(&a_id).unwrap().withdrawn);
    assert_eq!(
        w.coordinator.engine().incident_count() + second.engine().incident_count(),
        0
    );

    second.stop().await;
    w.coordinator.stop().await;
}

// ── Crash-restart: same store, same eventual phase ───────────────────────────

#[tokio::test]
async fn restart_resumes_pending_work_from_the_store() {
    let mut w = world("restart").await;
    let (digest, secret, _a_id, b_id) = lock_pair(&w);
    wait_until("both sides locked", || phase(&w, &digest) == Some(SwapPhase::BothLocked)).await;

    // Stop the coordinator, reveal while it is down, restart on the same
    // store and ledgers.
    w.coordinator.stop().await;
    w.chain_b.withdraw_as(ALICE_B, &b_id, &secret).unwrap();

    let mut revived = Coordinator::new(
        devnet_config(&w.path),
        w.store.clone(),
        w.clock.clone() as Arc<dyn Clock>,
        w.chain_a.clone() as Arc<dyn ChainAdapter>,
        w.chain_b.clone() as Arc<dyn ChainAdapter>,
    )
    .unwrap();
    revived.start().await.unwrap();

    wait_until("swap completed after restart", || {
        phase(&w, &digest) == Some(SwapPhase::Completed)
    })
    .await;

    revived.stop().await;
}

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, Notify, OwnedMutexGuard};
use tracing::{debug, info, warn};

use lockstep_core::swap::{SignalReason, SwapSignal};
use lockstep_core::types::{Clock, SwapId, TimestampMs};
use lockstep_store::SwapStore;

// ── Per-swap serialization ───────────────────────────────────────────────────

/// Keyed mutex: at most one action in flight per swap, unbounded concurrency
/// across distinct swaps (up to the worker ceiling).
#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<SwapId, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, swap_id: &SwapId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap();
            Arc::clone(map.entry(*swap_id).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))))
        };
        lock.lock_owned().await
    }

    /// Drop map entries no task is holding. Called from the retention sweep
    /// so the map tracks live swaps, not history.
    pub fn prune(&self) {
        self.inner.lock().unwrap().retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Timer wheel ──────────────────────────────────────────────────────────────

#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    at_ms: TimestampMs,
    swap_id: SwapId,
}

/// Earliest-first timer queue with 1-second resolution (configurable down for
/// tests). Entries are not persisted: deadlines and retry timers live on the
/// swaps themselves, and [`TimerWheel::rebuild`] rescans the store on start.
pub struct TimerWheel {
    entries: Mutex<BinaryHeap<Reverse<TimerEntry>>>,
    notify: Notify,
    resolution: Duration,
}

impl TimerWheel {
    pub fn new(resolution_ms: u64) -> Self {
        Self {
            entries: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            resolution: Duration::from_millis(resolution_ms.max(1)),
        }
    }

    /// Arm a wake-up for `swap_id` at `at_ms`. Duplicate arms are harmless —
    /// firing only triggers a re-evaluation.
    pub fn schedule(&self, swap_id: SwapId, at_ms: TimestampMs) {
        self.entries.lock().unwrap().push(Reverse(TimerEntry { at_ms, swap_id }));
        self.notify.notify_one();
    }

    /// Re-arm timers for every non-terminal swap in the store. Run at
    /// startup, before the ingestors begin.
    pub fn rebuild(&self, store: &SwapStore) -> Result<usize, lockstep_core::LockstepError> {
        let mut armed = 0;
        for swap in store.active_swaps()? {
            if let Some(wake) = swap.next_wake_ms() {
                self.schedule(swap.swap_id, wake);
                armed += 1;
            }
        }
        Ok(armed)
    }

    fn pop_due(&self, now_ms: TimestampMs) -> Vec<SwapId> {
        let mut entries = self.entries.lock().unwrap();
        let mut due = Vec::new();
        while let Some(Reverse(head)) = entries.peek() {
            if head.at_ms > now_ms {
                break;
            }
            due.push(entries.pop().unwrap().0.swap_id);
        }
        due
    }

    /// Tick loop: fire due timers as engine signals until shutdown.
    pub async fn run(
        self: Arc<Self>,
        clock: Arc<dyn Clock>,
        signals: mpsc::Sender<SwapSignal>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("timer wheel started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            for swap_id in self.pop_due(clock.now_ms()) {
                debug!(swap_id = %swap_id, "timer fired");
                if signals
                    .send(SwapSignal { swap_id, reason: SignalReason::Timer })
                    .await
                    .is_err()
                {
                    warn!("engine channel closed; timer wheel exiting");
                    return;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.resolution) => {}
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("timer wheel stopped");
    }
}

// ── Per-ledger rate limiter ──────────────────────────────────────────────────

/// Token bucket sized to the adapter's RPC budget: capacity = `rps` tokens,
/// refilled continuously at `rps` per second.
pub struct RateLimiter {
    capacity: f64,
    refill_per_ms: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rps: u32) -> Self {
        let capacity = rps.max(1) as f64;
        Self {
            capacity,
            refill_per_ms: capacity / 1_000.0,
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    /// Take one token, sleeping until the bucket refills if necessary.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                let elapsed_ms = state.last_refill.elapsed().as_millis() as f64;
                state.tokens = (state.tokens + elapsed_ms * self.refill_per_ms).min(self.capacity);
                state.last_refill = Instant::now();
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_millis(
                        ((1.0 - state.tokens) / self.refill_per_ms).ceil() as u64,
                    ))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn keyed_locks_serialize_per_swap() {
        let locks = Arc::new(KeyedLocks::new());
        let swap_id = SwapId::from_bytes([1; 32]);
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(&swap_id).await;
                let n = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(n, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "per-swap actions must not overlap");
    }

    #[tokio::test]
    async fn keyed_locks_allow_distinct_swaps_in_parallel() {
        let locks = Arc::new(KeyedLocks::new());
        let g1 = locks.acquire(&SwapId::from_bytes([1; 32])).await;
        // A different swap's lock must be immediately available.
        let g2 = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(&SwapId::from_bytes([2; 32])),
        )
        .await
        .expect("distinct swaps must not contend");
        drop(g1);
        drop(g2);
        locks.prune();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn timer_wheel_fires_due_entries_in_order() {
        use lockstep_core::types::ManualClock;

        let wheel = Arc::new(TimerWheel::new(5));
        let clock = Arc::new(ManualClock::new(10_000));
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let early = SwapId::from_bytes([1; 32]);
        let late = SwapId::from_bytes([2; 32]);
        wheel.schedule(late, 30_000);
        wheel.schedule(early, 20_000);

        let runner = tokio::spawn(Arc::clone(&wheel).run(clock.clone() as Arc<dyn Clock>, tx, shutdown_rx));

        // Nothing due yet.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());

        clock.set(20_000);
        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(fired.swap_id, early);
        assert_eq!(fired.reason, SignalReason::Timer);

        clock.set(30_000);
        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(fired.swap_id, late);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn rate_limiter_throttles_past_capacity() {
        let limiter = RateLimiter::new(5);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50), "burst fits the bucket");

        limiter.acquire().await;
        assert!(
            start.elapsed() >= Duration::from_millis(150),
            "sixth call must wait for a refill"
        );
    }
}

use rand::Rng;

/// Exponential backoff delay for retry `attempt` (0-based): base × 2^attempt
/// with ±25% jitter, clamped to `cap_ms`.
pub fn backoff_delay_ms(base_ms: u64, attempt: u32, cap_ms: u64) -> u64 {
    // 2^attempt saturates well before the shift would overflow.
    let exp = base_ms.saturating_mul(1u64 << attempt.min(20));
    let capped = exp.min(cap_ms);
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    ((capped as f64 * jitter) as u64).clamp(1, cap_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_within_jitter_bounds() {
        for attempt in 0..6u32 {
            let expected = 500u64 << attempt;
            for _ in 0..50 {
                let d = backoff_delay_ms(500, attempt, 600_000);
                assert!(d >= expected * 3 / 4, "attempt {attempt}: {d} too small");
                assert!(d <= expected * 5 / 4, "attempt {attempt}: {d} too large");
            }
        }
    }

    #[test]
    fn never_exceeds_cap() {
        for _ in 0..100 {
            assert!(backoff_delay_ms(500, 30, 10_000) <= 10_000);
        }
    }

    #[test]
    fn never_returns_zero() {
        for _ in 0..100 {
            assert!(backoff_delay_ms(1, 0, 10) >= 1);
        }
    }
}

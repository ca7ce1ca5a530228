use lockstep_core::types::{Digest, HashAlgo, SwapId};

/// Domain separators so swap ids can never collide with other BLAKE3 uses.
const SWAP_ID_DOMAIN: &[u8] = b"lockstep/swap-id/v1";
const SWAP_KEY_DOMAIN: &[u8] = b"lockstep/swap-key/v1";

/// Content-addressed swap id from the hashlock.
///
/// Derived from `(algorithm, digest)` rather than the pair of escrow ids so
/// that two coordinators — or one coordinator seeing the two creation events
/// in either order — resolve both escrows to the same swap record before the
/// pairing is complete. One digest maps to one swap; extra escrows on the
/// same digest are an ambiguity, not a second swap.
pub fn swap_id_for(digest: &Digest, algo: HashAlgo) -> SwapId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(SWAP_ID_DOMAIN);
    hasher.update(&[algo.as_flag()]);
    hasher.update(digest.as_bytes());
    SwapId::from_bytes(*hasher.finalize().as_bytes())
}

/// Swap id for an operator-registered swap with a caller-supplied unique key.
pub fn swap_id_from_key(key: &str) -> SwapId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(SWAP_KEY_DOMAIN);
    hasher.update(key.as_bytes());
    SwapId::from_bytes(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_id_is_deterministic() {
        let d = Digest::from_bytes([5; 32]);
        assert_eq!(swap_id_for(&d, HashAlgo::Sha256), swap_id_for(&d, HashAlgo::Sha256));
    }

    #[test]
    fn swap_id_depends_on_algorithm_and_digest() {
        let d1 = Digest::from_bytes([5; 32]);
        let d2 = Digest::from_bytes([6; 32]);
        assert_ne!(swap_id_for(&d1, HashAlgo::Sha256), swap_id_for(&d1, HashAlgo::Keccak256));
        assert_ne!(swap_id_for(&d1, HashAlgo::Sha256), swap_id_for(&d2, HashAlgo::Sha256));
    }

    #[test]
    fn key_ids_live_in_a_separate_domain() {
        let d = Digest::from_bytes([5; 32]);
        assert_ne!(swap_id_from_key(&d.to_hex()), swap_id_for(&d, HashAlgo::Sha256));
    }
}

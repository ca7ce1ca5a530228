use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest as _, Sha256};
use sha3::Keccak256;
use subtle::ConstantTimeEq;

use lockstep_core::types::{Digest, HashAlgo, Secret};

/// Hash a preimage under the given algorithm. Deterministic; the algorithm is
/// always an explicit parameter, there is no process-wide default.
pub fn digest(secret: &Secret, algo: HashAlgo) -> Digest {
    let out: [u8; 32] = match algo {
        HashAlgo::Keccak256 => Keccak256::digest(secret.as_bytes()).into(),
        HashAlgo::Sha256 => Sha256::digest(secret.as_bytes()).into(),
    };
    Digest::from_bytes(out)
}

/// Recompute and compare in constant time. The comparison must not leak how
/// many digest bytes matched.
pub fn verify(secret: &Secret, expected: &Digest, algo: HashAlgo) -> bool {
    let actual = digest(secret, algo);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Fresh 32-byte preimage from the operating system's CSPRNG.
pub fn random_secret() -> Secret {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Secret::from_bytes(bytes)
}

//! Message proof-of-work generation and validation.
//!
//! The work value of a (digest, nonce) pair is the first 8 bytes of
//! `Blake2b-256(digest || nonce_le)` interpreted as a little-endian u64; a
//! nonce is valid when its work value meets the difficulty threshold.

use crate::hash::blake2b_256;

/// Compute the work value for a 32-byte digest and a nonce.
pub fn work_value(digest: &[u8; 32], nonce: u64) -> u64 {
    let mut input = [0u8; 40];
    input[0..32].copy_from_slice(digest);
    input[32..40].copy_from_slice(&nonce.to_le_bytes());

    let hash = blake2b_256(&input);
    u64::from_le_bytes([
        hash[0], hash[1], hash[2], hash[3], hash[4], hash[5], hash[6], hash[7],
    ])
}

/// Validate that a nonce meets the minimum difficulty for a digest.
pub fn validate_work(digest: &[u8; 32], nonce: u64, min_difficulty: u64) -> bool {
    work_value(digest, nonce) >= min_difficulty
}

/// Generates proof-of-work nonces (CPU).
pub struct WorkGenerator;

impl WorkGenerator {
    /// Iterate nonces from zero until one meets the threshold.
    ///
    /// Returns `None` if the nonce space is exhausted, which cannot happen for
    /// any realistic difficulty.
    pub fn generate(&self, digest: &[u8; 32], min_difficulty: u64) -> Option<u64> {
        (0..u64::MAX).find(|&nonce| validate_work(digest, nonce, min_difficulty))
    }
}

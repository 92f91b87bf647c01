//! Blake2b-256 digest helper used for all content addressing.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Compute the Blake2b-256 digest of `bytes`.
pub fn blake2b_256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    out
}

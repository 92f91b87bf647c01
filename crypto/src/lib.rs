//! Cryptographic primitives: Blake2b digests, Ed25519 and BLS12-381
//! signatures, and the message proof-of-work.

pub mod hash;
pub mod keys;
pub mod pow;
pub mod sign;

pub use hash::blake2b_256;
pub use keys::{bls_keypair_from_seed, generate_keypair, keypair_from_seed, node_id, BlsKeyPair};
pub use pow::{validate_work, WorkGenerator};
pub use sign::{bls_sign, bls_verify, sign_message, verify_signature, CryptoError};

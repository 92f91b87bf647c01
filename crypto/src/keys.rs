//! Key generation and identity derivation.

use ed25519_dalek::SigningKey;
use rand::RngCore;

use tangle_types::{BlsPublicKey, KeyPair, NodeId, PrivateKey, PublicKey};

use crate::hash::blake2b_256;
use crate::sign::CryptoError;

/// Generate a fresh Ed25519 key pair from the OS RNG.
pub fn generate_keypair() -> KeyPair {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    keypair_from_seed(&seed)
}

/// Derive a deterministic Ed25519 key pair from a 32-byte seed.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let signing_key = SigningKey::from_bytes(seed);
    KeyPair {
        public: PublicKey(signing_key.verifying_key().to_bytes()),
        private: PrivateKey(*seed),
    }
}

/// Derive the node identity from an issuer public key.
pub fn node_id(public_key: &PublicKey) -> NodeId {
    NodeId::new(blake2b_256(public_key.as_bytes()))
}

/// A BLS12-381 key pair in the min-sig scheme (public key in G2).
pub struct BlsKeyPair {
    pub public: BlsPublicKey,
    /// 32-byte secret scalar, usable with [`crate::sign::bls_sign`].
    pub secret: [u8; 32],
}

/// Derive a deterministic BLS12-381 key pair from a 32-byte seed.
pub fn bls_keypair_from_seed(seed: &[u8; 32]) -> Result<BlsKeyPair, CryptoError> {
    let sk = blst::min_sig::SecretKey::key_gen(seed, &[])
        .map_err(|e| CryptoError::InvalidKey(format!("BLS key generation: {e:?}")))?;
    Ok(BlsKeyPair {
        public: BlsPublicKey(sk.sk_to_pk().to_bytes()),
        secret: sk.to_bytes(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_from_seed_is_deterministic() {
        let a = keypair_from_seed(&[7u8; 32]);
        let b = keypair_from_seed(&[7u8; 32]);
        assert_eq!(a.public, b.public);
    }

    #[test]
    fn distinct_seeds_give_distinct_keys() {
        let a = keypair_from_seed(&[1u8; 32]);
        let b = keypair_from_seed(&[2u8; 32]);
        assert_ne!(a.public, b.public);
    }

    #[test]
    fn node_id_is_stable_per_key() {
        let kp = keypair_from_seed(&[3u8; 32]);
        assert_eq!(node_id(&kp.public), node_id(&kp.public));
    }

    #[test]
    fn bls_keypair_derivation() {
        let a = bls_keypair_from_seed(&[9u8; 32]).unwrap();
        let b = bls_keypair_from_seed(&[9u8; 32]).unwrap();
        assert_eq!(a.public, b.public);
    }
}

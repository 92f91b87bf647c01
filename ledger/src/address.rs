//! Ledger addresses — the digest of the public key an output is bound to,
//! tagged with the signature scheme that unlocks it.

use serde::{Deserialize, Serialize};
use std::fmt;

use tangle_crypto::blake2b_256;
use tangle_types::{BlsPublicKey, PublicKey};

/// The signature scheme an address is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AddressKind {
    Ed25519,
    Bls,
}

/// An address: scheme tag plus the Blake2b-256 digest of the public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub kind: AddressKind,
    pub digest: [u8; 32],
}

impl Address {
    pub fn from_ed25519_public_key(public_key: &PublicKey) -> Self {
        Self {
            kind: AddressKind::Ed25519,
            digest: blake2b_256(public_key.as_bytes()),
        }
    }

    pub fn from_bls_public_key(public_key: &BlsPublicKey) -> Self {
        Self {
            kind: AddressKind::Bls,
            digest: blake2b_256(public_key.as_bytes()),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:?}, ", self.kind)?;
        for b in &self.digest[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.kind {
            AddressKind::Ed25519 => "ed",
            AddressKind::Bls => "bls",
        };
        write!(f, "{tag}_")?;
        for b in &self.digest {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tangle_crypto::keypair_from_seed;

    #[test]
    fn derivation_is_deterministic() {
        let kp = keypair_from_seed(&[1u8; 32]);
        assert_eq!(
            Address::from_ed25519_public_key(&kp.public),
            Address::from_ed25519_public_key(&kp.public),
        );
    }

    #[test]
    fn kinds_distinguish_addresses() {
        let ed = Address {
            kind: AddressKind::Ed25519,
            digest: [5u8; 32],
        };
        let bls = Address {
            kind: AddressKind::Bls,
            digest: [5u8; 32],
        };
        assert_ne!(ed, bls);
    }
}

//! Unlock blocks and their verification against referenced outputs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tangle_crypto::{bls_verify, verify_signature};
use tangle_types::{BlsPublicKey, BlsSignature, PublicKey, Signature};

use crate::address::Address;
use crate::output::Output;

/// A signature over the transaction essence digest, in one of the supported
/// schemes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureUnlock {
    Ed25519 {
        public_key: PublicKey,
        signature: Signature,
    },
    Bls {
        public_key: BlsPublicKey,
        signature: BlsSignature,
    },
}

impl SignatureUnlock {
    /// The address this unlock's public key corresponds to.
    pub fn address(&self) -> Address {
        match self {
            SignatureUnlock::Ed25519 { public_key, .. } => {
                Address::from_ed25519_public_key(public_key)
            }
            SignatureUnlock::Bls { public_key, .. } => Address::from_bls_public_key(public_key),
        }
    }

    /// Verify the signature over `message` (the essence digest).
    pub fn verify(&self, message: &[u8]) -> bool {
        match self {
            SignatureUnlock::Ed25519 {
                public_key,
                signature,
            } => verify_signature(message, signature, public_key),
            SignatureUnlock::Bls {
                public_key,
                signature,
            } => bls_verify(message, signature, public_key),
        }
    }
}

/// One unlock block per input: either a signature, or a back-reference to an
/// earlier signature unlock for the same address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockBlock {
    Signature(SignatureUnlock),
    Reference(u16),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UnlockError {
    #[error("{unlocks} unlock blocks for {inputs} inputs")]
    CountMismatch { inputs: usize, unlocks: usize },

    #[error("unlock {index} does not match the address of its referenced output")]
    AddressMismatch { index: usize },

    #[error("unlock {index} carries an invalid signature")]
    InvalidSignature { index: usize },

    #[error("unlock {index} references a non-signature or forward unlock")]
    InvalidReference { index: usize },
}

/// Validate the unlock blocks of a transaction against the outputs its inputs
/// reference, in input order.
///
/// `message` is the essence digest every signature must cover; `consumed[i]`
/// is the output referenced by input `i`.
pub fn validate_unlocks(
    message: &[u8],
    unlocks: &[UnlockBlock],
    consumed: &[Output],
) -> Result<(), UnlockError> {
    if unlocks.len() != consumed.len() {
        return Err(UnlockError::CountMismatch {
            inputs: consumed.len(),
            unlocks: unlocks.len(),
        });
    }

    for (index, (unlock, output)) in unlocks.iter().zip(consumed).enumerate() {
        match unlock {
            UnlockBlock::Signature(signature_unlock) => {
                if signature_unlock.address() != *output.address() {
                    return Err(UnlockError::AddressMismatch { index });
                }
                if !signature_unlock.verify(message) {
                    return Err(UnlockError::InvalidSignature { index });
                }
            }
            UnlockBlock::Reference(referenced) => {
                let referenced = *referenced as usize;
                if referenced >= index {
                    return Err(UnlockError::InvalidReference { index });
                }
                match &unlocks[referenced] {
                    UnlockBlock::Signature(signature_unlock) => {
                        if signature_unlock.address() != *output.address() {
                            return Err(UnlockError::AddressMismatch { index });
                        }
                    }
                    UnlockBlock::Reference(_) => {
                        return Err(UnlockError::InvalidReference { index });
                    }
                }
            }
        }
    }

    Ok(())
}

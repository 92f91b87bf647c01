//! Ed25519 and BLS12-381 signing and verification.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

use tangle_types::{BlsPublicKey, BlsSignature, PrivateKey, PublicKey, Signature};

/// Domain separation tag for the min-sig ciphersuite (signatures hashed to G1).
const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),
}

/// Sign a message with an Ed25519 private key, returning the signature.
pub fn sign_message(message: &[u8], private_key: &PrivateKey) -> Signature {
    let signing_key = SigningKey::from_bytes(&private_key.0);
    let sig = signing_key.sign(message);
    Signature(sig.to_bytes())
}

/// Verify an Ed25519 signature against a message and public key.
///
/// Returns `true` if the signature is valid, `false` otherwise.
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(&public_key.0) else {
        return false;
    };
    let dalek_sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key.verify(message, &dalek_sig).is_ok()
}

/// Sign a message with a BLS secret scalar (min-sig scheme, signature in G1).
pub fn bls_sign(message: &[u8], secret: &[u8; 32]) -> Result<BlsSignature, CryptoError> {
    let sk = blst::min_sig::SecretKey::from_bytes(secret)
        .map_err(|e| CryptoError::InvalidKey(format!("secret scalar deserialization: {e:?}")))?;
    Ok(BlsSignature(sk.sign(message, BLS_DST, &[]).to_bytes()))
}

/// Verify a BLS12-381 signature (min-sig scheme: signature on G1, public key
/// on G2). Malformed points verify as `false`.
pub fn bls_verify(message: &[u8], signature: &BlsSignature, public_key: &BlsPublicKey) -> bool {
    let Ok(pk) = blst::min_sig::PublicKey::from_bytes(public_key.as_bytes()) else {
        return false;
    };
    let Ok(sig) = blst::min_sig::Signature::from_bytes(signature.as_bytes()) else {
        return false;
    };
    sig.verify(true, message, BLS_DST, &[], &pk, true) == blst::BLST_ERROR::BLST_SUCCESS
}

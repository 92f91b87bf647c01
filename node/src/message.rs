//! The message — the atom of the DAG.

use serde::{Deserialize, Serialize};

use tangle_crypto::{blake2b_256, node_id, pow, sign_message, verify_signature};
use tangle_ledger::Transaction;
use tangle_store::StorageObject;
use tangle_types::{KeyPair, MessageId, NodeId, PublicKey, Signature, Timestamp};

use crate::error::TangleError;

pub const MAX_STRONG_PARENTS: usize = 8;
pub const MAX_WEAK_PARENTS: usize = 8;

/// A message payload. The bincode variant index doubles as the 4-byte wire
/// type tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Opaque application data.
    Data(Vec<u8>),
    /// A UTXO transaction to be booked.
    Transaction(Box<Transaction>),
}

impl Payload {
    pub fn as_transaction(&self) -> Option<&Transaction> {
        match self {
            Payload::Transaction(tx) => Some(tx),
            Payload::Data(_) => None,
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, Payload::Transaction(_))
    }
}

/// A DAG message. Immutable after creation; the ID is the Blake2b-256 digest
/// of the canonical (bincode) encoding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub version: u8,
    /// Referenced predecessors whose past cone this message approves (1..=8).
    pub strong_parents: Vec<MessageId>,
    /// Referenced predecessors whose payloads alone are approved (0..=8).
    pub weak_parents: Vec<MessageId>,
    pub issuing_time: Timestamp,
    pub issuer_public_key: PublicKey,
    /// Monotonic per-issuer counter.
    pub sequence_number: u64,
    pub payload: Payload,
    /// Proof-of-work nonce over the essence digest.
    pub nonce: u64,
    /// Ed25519 signature over the canonical prefix (everything before it).
    pub signature: Signature,
}

pub const MESSAGE_VERSION: u8 = 1;

impl Message {
    /// Construct, solve PoW for, and sign a message.
    ///
    /// Parents are deduplicated and sorted into the canonical order here.
    pub fn new(
        strong_parents: Vec<MessageId>,
        weak_parents: Vec<MessageId>,
        issuing_time: Timestamp,
        identity: &KeyPair,
        sequence_number: u64,
        payload: Payload,
        pow_difficulty: u64,
    ) -> Result<Self, TangleError> {
        let strong_parents = canonical_parents(strong_parents);
        let weak_parents = canonical_parents(weak_parents);

        let mut message = Self {
            version: MESSAGE_VERSION,
            strong_parents,
            weak_parents,
            issuing_time,
            issuer_public_key: identity.public.clone(),
            sequence_number,
            payload,
            nonce: 0,
            signature: Signature::ZERO,
        };
        message.validate_structure().map_err(TangleError::InvalidMessage)?;

        message.nonce = pow::WorkGenerator
            .generate(&message.pow_digest(), pow_difficulty)
            .ok_or_else(|| TangleError::InvalidMessage("nonce space exhausted".into()))?;
        message.signature = sign_message(&message.signing_digest(), &identity.private);
        Ok(message)
    }

    /// The canonical encoding of the full message.
    pub fn bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("message serialization cannot fail")
    }

    pub fn id(&self) -> MessageId {
        MessageId::new(blake2b_256(&self.bytes()))
    }

    /// Everything but the nonce and the signature — the PoW input.
    fn essence_bytes(&self) -> Vec<u8> {
        bincode::serialize(&(
            &self.version,
            &self.strong_parents,
            &self.weak_parents,
            &self.issuing_time,
            &self.issuer_public_key,
            &self.sequence_number,
            &self.payload,
        ))
        .expect("message serialization cannot fail")
    }

    pub fn pow_digest(&self) -> [u8; 32] {
        blake2b_256(&self.essence_bytes())
    }

    /// Digest of the canonical prefix (essence plus nonce) the signature
    /// covers.
    pub fn signing_digest(&self) -> [u8; 32] {
        let mut bytes = self.essence_bytes();
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        blake2b_256(&bytes)
    }

    pub fn verify_signature(&self) -> bool {
        verify_signature(
            &self.signing_digest(),
            &self.signature,
            &self.issuer_public_key,
        )
    }

    /// The issuer's node identity.
    pub fn issuer(&self) -> NodeId {
        node_id(&self.issuer_public_key)
    }

    /// All parents, strong first.
    pub fn parents(&self) -> impl Iterator<Item = &MessageId> {
        self.strong_parents.iter().chain(self.weak_parents.iter())
    }

    /// Structural sanity: parent counts and canonical parent ordering.
    pub fn validate_structure(&self) -> Result<(), String> {
        if self.version != MESSAGE_VERSION {
            return Err(format!("unsupported message version {}", self.version));
        }
        if self.strong_parents.is_empty() || self.strong_parents.len() > MAX_STRONG_PARENTS {
            return Err(format!(
                "strong parent count {} out of range",
                self.strong_parents.len()
            ));
        }
        if self.weak_parents.len() > MAX_WEAK_PARENTS {
            return Err(format!(
                "weak parent count {} out of range",
                self.weak_parents.len()
            ));
        }
        for parents in [&self.strong_parents, &self.weak_parents] {
            if !parents.windows(2).all(|pair| pair[0] < pair[1]) {
                return Err("parents are not in canonical order".into());
            }
        }
        Ok(())
    }
}

fn canonical_parents(mut parents: Vec<MessageId>) -> Vec<MessageId> {
    parents.sort();
    parents.dedup();
    parents
}

impl StorageObject for Message {
    fn storage_key(&self) -> Vec<u8> {
        self.id().to_vec()
    }
}

//! Builds locally issued messages: parents from tip selection, the node's
//! identity and per-issuer sequence counter, proof-of-work, signature.

use std::sync::atomic::{AtomicU64, Ordering};

use tangle_types::{KeyPair, MessageId, NodeId, Timestamp};

use crate::error::TangleError;
use crate::message::{Message, Payload};

pub struct MessageFactory {
    identity: KeyPair,
    sequence_number: AtomicU64,
    pow_difficulty: u64,
}

impl MessageFactory {
    pub fn new(identity: KeyPair, pow_difficulty: u64) -> Self {
        Self {
            identity,
            sequence_number: AtomicU64::new(0),
            pow_difficulty,
        }
    }

    /// The local node's identity.
    pub fn node_id(&self) -> NodeId {
        tangle_crypto::node_id(&self.identity.public)
    }

    /// Assemble a signed message with the next sequence number.
    pub fn create(
        &self,
        strong_parents: Vec<MessageId>,
        weak_parents: Vec<MessageId>,
        payload: Payload,
        issuing_time: Timestamp,
    ) -> Result<Message, TangleError> {
        let sequence_number = self.sequence_number.fetch_add(1, Ordering::AcqRel);
        Message::new(
            strong_parents,
            weak_parents,
            issuing_time,
            &self.identity,
            sequence_number,
            payload,
            self.pow_difficulty,
        )
    }
}

//! The gossip parser: decode untrusted bytes, verify proof-of-work and the
//! issuer signature, and hand validated messages to storage. Rejections are
//! silent drops (logged, event fired, nothing persisted).

use thiserror::Error;

use tangle_crypto::pow;
use tangle_types::NodeId;

use crate::events::{MessageRejectedEvent, ParserEvents};
use crate::message::Message;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParseRejection {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("proof-of-work does not meet the difficulty threshold")]
    InsufficientWork,

    #[error("issuer signature is invalid")]
    InvalidSignature,
}

pub struct Parser {
    pow_difficulty: u64,
    pub events: ParserEvents,
}

impl Parser {
    pub fn new(pow_difficulty: u64) -> Self {
        Self {
            pow_difficulty,
            events: ParserEvents::default(),
        }
    }

    /// Parse and validate untrusted gossip bytes from `peer`.
    ///
    /// On rejection the typed reason is returned, `MessageRejected` fires,
    /// and nothing is persisted.
    pub fn parse(&self, bytes: &[u8], peer: NodeId) -> Result<Message, ParseRejection> {
        match self.check(bytes) {
            Ok(message) => Ok(message),
            Err(rejection) => {
                tracing::info!(%peer, reason = %rejection, "message rejected in parser");
                self.events.message_rejected.trigger(&MessageRejectedEvent {
                    peer,
                    reason: rejection.to_string(),
                });
                Err(rejection)
            }
        }
    }

    fn check(&self, bytes: &[u8]) -> Result<Message, ParseRejection> {
        let message: Message = bincode::deserialize(bytes)
            .map_err(|e| ParseRejection::Malformed(e.to_string()))?;

        message
            .validate_structure()
            .map_err(ParseRejection::Malformed)?;

        if !pow::validate_work(&message.pow_digest(), message.nonce, self.pow_difficulty) {
            return Err(ParseRejection::InsufficientWork);
        }

        if !message.verify_signature() {
            return Err(ParseRejection::InvalidSignature);
        }

        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tangle_crypto::keypair_from_seed;
    use tangle_types::{MessageId, Signature, Timestamp};

    fn signed_message(difficulty: u64) -> Message {
        Message::new(
            vec![MessageId::EMPTY],
            vec![],
            Timestamp::new(1000),
            &keypair_from_seed(&[1u8; 32]),
            0,
            Payload::Data(b"gossip".to_vec()),
            difficulty,
        )
        .unwrap()
    }

    fn peer() -> NodeId {
        NodeId::new([9u8; 32])
    }

    #[test]
    fn valid_bytes_parse() {
        let parser = Parser::new(0);
        let message = signed_message(0);
        let parsed = parser.parse(&message.bytes(), peer()).unwrap();
        assert_eq!(parsed.id(), message.id());
    }

    #[test]
    fn garbage_bytes_are_malformed() {
        let parser = Parser::new(0);
        let rejections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&rejections);
        parser.events.message_rejected.attach(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = parser.parse(&[0xFF; 16], peer());
        assert!(matches!(result, Err(ParseRejection::Malformed(_))));
        assert_eq!(rejections.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn insufficient_work_is_rejected() {
        let parser = Parser::new(u64::MAX);
        let message = signed_message(0);
        assert_eq!(
            parser.parse(&message.bytes(), peer()),
            Err(ParseRejection::InsufficientWork)
        );
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let parser = Parser::new(0);
        let mut message = signed_message(0);
        message.signature = Signature([0x55; 64]);
        assert_eq!(
            parser.parse(&message.bytes(), peer()),
            Err(ParseRejection::InvalidSignature)
        );
    }

    #[test]
    fn work_meeting_threshold_passes() {
        let difficulty = 1000;
        let parser = Parser::new(difficulty);
        let message = signed_message(difficulty);
        assert!(parser.parse(&message.bytes(), peer()).is_ok());
    }
}

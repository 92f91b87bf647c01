//! Shared primitive types for the tangle workspace.

pub mod ids;
pub mod keys;
pub mod time;

pub use ids::{BranchId, Color, MessageId, NodeId, OutputId, TransactionId};
pub use keys::{BlsPublicKey, BlsSignature, KeyPair, PrivateKey, PublicKey, Signature};
pub use time::Timestamp;

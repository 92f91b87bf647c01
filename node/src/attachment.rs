//! Attachments — back-references from a transaction to every message whose
//! payload carries it.

use serde::{Deserialize, Serialize};

use tangle_store::StorageObject;
use tangle_types::{MessageId, TransactionId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub transaction_id: TransactionId,
    pub message_id: MessageId,
}

impl StorageObject for Attachment {
    /// Composite key `transaction_id ++ message_id`: one prefix range per
    /// transaction.
    fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(64);
        key.extend_from_slice(self.transaction_id.as_bytes());
        key.extend_from_slice(self.message_id.as_bytes());
        key
    }
}

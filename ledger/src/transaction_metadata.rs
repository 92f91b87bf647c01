//! Per-transaction booking state: assigned branch plus terminal flags.

use serde::{Deserialize, Serialize};

use tangle_store::StorageObject;
use tangle_types::{BranchId, TransactionId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub transaction_id: TransactionId,
    pub branch_id: BranchId,
    booked: bool,
    rejected: bool,
    finalized: bool,
}

impl TransactionMetadata {
    pub fn new(transaction_id: TransactionId, branch_id: BranchId) -> Self {
        Self {
            transaction_id,
            branch_id,
            booked: false,
            rejected: false,
            finalized: false,
        }
    }

    pub fn is_booked(&self) -> bool {
        self.booked
    }

    pub fn set_booked(&mut self) -> bool {
        if self.booked {
            return false;
        }
        self.booked = true;
        true
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected
    }

    pub fn set_rejected(&mut self) -> bool {
        if self.rejected {
            return false;
        }
        self.rejected = true;
        true
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn set_finalized(&mut self) -> bool {
        if self.finalized {
            return false;
        }
        self.finalized = true;
        true
    }
}

impl StorageObject for TransactionMetadata {
    fn storage_key(&self) -> Vec<u8> {
        self.transaction_id.to_vec()
    }
}

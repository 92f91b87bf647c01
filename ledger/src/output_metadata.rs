//! Mutable per-output bookkeeping kept alongside the output itself.

use serde::{Deserialize, Serialize};

use tangle_store::StorageObject;
use tangle_types::{BranchId, OutputId, TransactionId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMetadata {
    pub output_id: OutputId,
    pub branch_id: BranchId,
    solid: bool,
    /// Set once the consuming transaction is confirmed; a finalized spend is
    /// irreversible and any later consumer is rejected.
    finalized: bool,
    consumer_count: u32,
    first_consumer: Option<TransactionId>,
}

impl OutputMetadata {
    pub fn new(output_id: OutputId, branch_id: BranchId) -> Self {
        Self {
            output_id,
            branch_id,
            solid: false,
            finalized: false,
            consumer_count: 0,
            first_consumer: None,
        }
    }

    pub fn is_solid(&self) -> bool {
        self.solid
    }

    /// Mark solid. Returns whether this call effected the transition.
    pub fn set_solid(&mut self) -> bool {
        if self.solid {
            return false;
        }
        self.solid = true;
        true
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Mark the spend of this output finalized. Returns whether this call
    /// effected the transition.
    pub fn set_finalized(&mut self) -> bool {
        if self.finalized {
            return false;
        }
        self.finalized = true;
        true
    }

    pub fn consumer_count(&self) -> u32 {
        self.consumer_count
    }

    pub fn first_consumer(&self) -> Option<TransactionId> {
        self.first_consumer
    }

    /// Record a consuming transaction; the first consumer is remembered.
    /// Returns the new consumer count.
    pub fn register_consumer(&mut self, consumer: TransactionId) -> u32 {
        if self.first_consumer.is_none() {
            self.first_consumer = Some(consumer);
        }
        self.consumer_count += 1;
        self.consumer_count
    }
}

impl StorageObject for OutputMetadata {
    fn storage_key(&self) -> Vec<u8> {
        self.output_id.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> OutputMetadata {
        OutputMetadata::new(
            OutputId::new(TransactionId::new([1u8; 32]), 0),
            BranchId::MASTER,
        )
    }

    #[test]
    fn solid_transition_fires_once() {
        let mut meta = metadata();
        assert!(meta.set_solid());
        assert!(!meta.set_solid());
        assert!(meta.is_solid());
    }

    #[test]
    fn first_consumer_is_sticky() {
        let mut meta = metadata();
        let t1 = TransactionId::new([2u8; 32]);
        let t2 = TransactionId::new([3u8; 32]);
        assert_eq!(meta.register_consumer(t1), 1);
        assert_eq!(meta.register_consumer(t2), 2);
        assert_eq!(meta.first_consumer(), Some(t1));
    }
}

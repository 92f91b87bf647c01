//! Ledger snapshots — a serialized initial ledger state.
//!
//! A snapshot captures outputs, their metadata, and the branch DAG so a node
//! can start from a known state instead of replaying history. Loaded once at
//! startup when configured.

use serde::{Deserialize, Serialize};

use tangle_types::BranchId;

use crate::branch::Branch;
use crate::error::LedgerError;
use crate::output::OutputRecord;
use crate::output_metadata::OutputMetadata;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub outputs: Vec<OutputRecord>,
    pub output_metadata: Vec<OutputMetadata>,
    pub branches: Vec<Branch>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a genesis output, solid in the master branch.
    pub fn add_output(&mut self, record: OutputRecord) {
        let mut metadata = OutputMetadata::new(record.id, BranchId::MASTER);
        metadata.set_solid();
        self.outputs.push(record);
        self.output_metadata.push(metadata);
    }

    /// Serialize the snapshot to bytes (bincode).
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("snapshot serialization should not fail")
    }

    /// Deserialize a snapshot from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        bincode::deserialize(bytes).map_err(|e| LedgerError::Snapshot(e.to_string()))
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Address, AddressKind};
    use crate::output::Output;
    use tangle_types::{OutputId, TransactionId};

    fn sample_record(byte: u8) -> OutputRecord {
        OutputRecord {
            id: OutputId::new(TransactionId::new([byte; 32]), 0),
            output: Output::SigLockedSingle {
                address: Address {
                    kind: AddressKind::Ed25519,
                    digest: [byte; 32],
                },
                amount: 100,
            },
        }
    }

    #[test]
    fn round_trip() {
        let mut snapshot = Snapshot::new();
        snapshot.add_output(sample_record(1));
        snapshot.add_output(sample_record(2));

        let bytes = snapshot.to_bytes();
        let back = Snapshot::from_bytes(&bytes).unwrap();
        assert_eq!(back.output_count(), 2);
        assert_eq!(back.outputs, snapshot.outputs);
        assert!(back.output_metadata.iter().all(|m| m.is_solid()));
    }

    #[test]
    fn garbage_bytes_fail() {
        assert!(Snapshot::from_bytes(&[0xFF, 0x00, 0x01]).is_err());
    }
}

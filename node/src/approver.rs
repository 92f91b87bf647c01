//! Approvers — the child-to-parent back-references that make the DAG
//! walkable forwards. Stored by id-indirection: an approver holds the parent
//! and child ids, never the objects.

use serde::{Deserialize, Serialize};

use tangle_store::StorageObject;
use tangle_types::MessageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproverKind {
    Strong,
    Weak,
}

impl ApproverKind {
    fn key_byte(&self) -> u8 {
        match self {
            ApproverKind::Strong => 0,
            ApproverKind::Weak => 1,
        }
    }
}

/// A typed back-reference from a parent message to one of its approvers.
/// Created when the child is stored; never deleted while the parent exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approver {
    pub parent: MessageId,
    pub child: MessageId,
    pub kind: ApproverKind,
}

impl StorageObject for Approver {
    /// Composite key `parent ++ child ++ kind` so all approvers of a parent
    /// form one contiguous prefix range.
    fn storage_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(65);
        key.extend_from_slice(self.parent.as_bytes());
        key.extend_from_slice(self.child.as_bytes());
        key.push(self.kind.key_byte());
        key
    }
}

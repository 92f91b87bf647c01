//! The branch DAG — conflict partitions of the ledger.
//!
//! The master branch is the unique root and is always liked. A conflict
//! branch is created per double-spending transaction (its ID reuses the
//! transaction ID) and is a member of one conflict set per contested output.
//! Aggregated branches represent the union of several conflict branches.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tangle_store::{prefix, BlobStore, CachedObject, ObjectStorage, StorageObject};
use tangle_types::{BranchId, OutputId, TransactionId};

use crate::error::LedgerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchKind {
    Master,
    Conflict,
    Aggregated,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub kind: BranchKind,
    pub parents: BTreeSet<BranchId>,
    pub liked: bool,
    /// The contested outputs this branch fights over (conflict branches only).
    pub conflict_ids: BTreeSet<OutputId>,
}

impl Branch {
    pub fn master() -> Self {
        Self {
            id: BranchId::MASTER,
            kind: BranchKind::Master,
            parents: BTreeSet::new(),
            liked: true,
            conflict_ids: BTreeSet::new(),
        }
    }
}

impl StorageObject for Branch {
    fn storage_key(&self) -> Vec<u8> {
        self.id.to_vec()
    }
}

pub struct BranchDag {
    branches: ObjectStorage<Branch>,
    /// contested output → the conflict branches competing for it.
    conflict_sets: Mutex<HashMap<OutputId, BTreeSet<BranchId>>>,
}

impl BranchDag {
    pub fn new(blob: Arc<dyn BlobStore>, cache_time: Duration) -> Result<Self, LedgerError> {
        let branches = ObjectStorage::new(blob, prefix::PREFIX_BRANCH, cache_time);
        branches.store_if_absent(Branch::master())?;
        Ok(Self {
            branches,
            conflict_sets: Mutex::new(HashMap::new()),
        })
    }

    pub fn branch(&self, id: &BranchId) -> Result<Option<CachedObject<Branch>>, LedgerError> {
        Ok(self.branches.load(id.as_bytes())?)
    }

    pub fn is_liked(&self, id: &BranchId) -> Result<bool, LedgerError> {
        match self.branch(id)? {
            Some(view) => Ok(view.read(|branch| branch.liked)),
            None => Err(LedgerError::UnknownBranch(*id)),
        }
    }

    /// Flip the liked flag. Returns whether the flag changed.
    pub fn set_liked(&self, id: &BranchId, liked: bool) -> Result<bool, LedgerError> {
        let view = self
            .branch(id)?
            .ok_or(LedgerError::UnknownBranch(*id))?;
        Ok(view.write(|branch| {
            if branch.liked == liked {
                return false;
            }
            branch.liked = liked;
            true
        })?)
    }

    /// Expand a branch into the leaf conflict branches it stands for.
    fn leaf_members(&self, id: &BranchId) -> Result<BTreeSet<BranchId>, LedgerError> {
        let view = self.branch(id)?.ok_or(LedgerError::UnknownBranch(*id))?;
        let (kind, parents) = view.read(|branch| (branch.kind, branch.parents.clone()));
        match kind {
            BranchKind::Master | BranchKind::Conflict => Ok(BTreeSet::from([*id])),
            BranchKind::Aggregated => {
                let mut leaves = BTreeSet::new();
                for parent in &parents {
                    leaves.extend(self.leaf_members(parent)?);
                }
                Ok(leaves)
            }
        }
    }

    /// Aggregate a set of branches: the set-union of their leaf conflict
    /// branches, normalized (master absorbed by any sibling, a single member
    /// aggregates to itself).
    pub fn aggregate(&self, members: &BTreeSet<BranchId>) -> Result<BranchId, LedgerError> {
        let mut leaves = BTreeSet::new();
        for member in members {
            leaves.extend(self.leaf_members(member)?);
        }
        if leaves.len() > 1 {
            leaves.remove(&BranchId::MASTER);
        }

        match leaves.len() {
            0 => Ok(BranchId::MASTER),
            1 => Ok(*leaves.iter().next().expect("len checked")),
            _ => {
                let mut bytes = Vec::with_capacity(leaves.len() * 32);
                for leaf in &leaves {
                    bytes.extend_from_slice(leaf.as_bytes());
                }
                let id = BranchId::new(tangle_crypto::blake2b_256(&bytes));

                let mut liked = true;
                for leaf in &leaves {
                    liked &= self.is_liked(leaf)?;
                }

                self.branches.store_if_absent(Branch {
                    id,
                    kind: BranchKind::Aggregated,
                    parents: leaves,
                    liked,
                    conflict_ids: BTreeSet::new(),
                })?;
                Ok(id)
            }
        }
    }

    /// Create (or extend) the conflict branch of `transaction_id`, contesting
    /// `conflict_output`. The branch ID reuses the transaction ID; repeated
    /// calls add further contested outputs to the same branch.
    pub fn create_conflict_branch(
        &self,
        transaction_id: TransactionId,
        parent: BranchId,
        conflict_output: OutputId,
    ) -> Result<BranchId, LedgerError> {
        let id = BranchId::new(*transaction_id.as_bytes());
        let (view, created) = self.branches.store_if_absent(Branch {
            id,
            kind: BranchKind::Conflict,
            parents: BTreeSet::from([parent]),
            liked: false,
            conflict_ids: BTreeSet::from([conflict_output]),
        })?;
        if !created {
            view.write(|branch| {
                branch.conflict_ids.insert(conflict_output);
            })?;
        }

        self.lock_conflict_sets()
            .entry(conflict_output)
            .or_default()
            .insert(id);
        Ok(id)
    }

    /// The conflict branches contesting `output`.
    pub fn conflict_set(&self, output: &OutputId) -> BTreeSet<BranchId> {
        self.lock_conflict_sets()
            .get(output)
            .cloned()
            .unwrap_or_default()
    }

    /// Every branch that shares a conflict set with `id`, excluding `id`.
    pub fn conflicting_branches(&self, id: &BranchId) -> BTreeSet<BranchId> {
        let sets = self.lock_conflict_sets();
        let mut conflicting = BTreeSet::new();
        for members in sets.values() {
            if members.contains(id) {
                conflicting.extend(members.iter().copied());
            }
        }
        conflicting.remove(id);
        conflicting
    }

    /// Re-index a branch loaded from a snapshot into the conflict-set map.
    pub fn index_branch(&self, branch: &Branch) {
        let mut sets = self.lock_conflict_sets();
        for output in &branch.conflict_ids {
            sets.entry(*output).or_default().insert(branch.id);
        }
    }

    /// Persist a branch verbatim (snapshot loading).
    pub fn store_branch(&self, branch: Branch) -> Result<(), LedgerError> {
        self.index_branch(&branch);
        self.branches.store_if_absent(branch)?;
        Ok(())
    }

    pub fn sweep(&self) {
        self.branches.sweep();
    }

    pub fn flush(&self) {
        self.branches.flush();
    }

    fn lock_conflict_sets(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<OutputId, BTreeSet<BranchId>>> {
        match self.conflict_sets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

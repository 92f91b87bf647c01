use thiserror::Error;

use tangle_types::BranchId;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] tangle_store::StoreError),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("unknown branch: {0}")]
    UnknownBranch(BranchId),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

//! UTXO ledger: outputs, transactions with unlock blocks, the branch DAG of
//! conflict partitions, and the ledger state the booker applies transactions
//! against.

pub mod address;
pub mod branch;
pub mod error;
pub mod ledger_state;
pub mod output;
pub mod output_metadata;
pub mod snapshot;
pub mod transaction;
pub mod transaction_metadata;
pub mod unlock;

pub use address::{Address, AddressKind};
pub use branch::{Branch, BranchDag, BranchKind};
pub use error::LedgerError;
pub use ledger_state::{BookOutcome, InvalidReason, LedgerState};
pub use output::{AliasId, ColoredBalances, Output, OutputRecord};
pub use output_metadata::OutputMetadata;
pub use snapshot::Snapshot;
pub use transaction::{balances_valid, Transaction, TransactionEssence, TRANSACTION_VERSION};
pub use transaction_metadata::TransactionMetadata;
pub use unlock::{SignatureUnlock, UnlockBlock, UnlockError};

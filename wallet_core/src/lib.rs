//! Wallet-side ledger mirror: tracks the unspent outputs of the wallet's
//! addresses with locally-optimistic spend marking.

pub mod connector;
pub mod error;
pub mod output;
pub mod unspent_output_manager;

pub use connector::Connector;
pub use error::WalletError;
pub use output::{InclusionState, WalletOutput};
pub use unspent_output_manager::{RefreshOptions, UnspentOutputManager};

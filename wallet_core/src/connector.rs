//! The node-facing boundary of the wallet.

use std::collections::HashMap;

use tangle_ledger::Address;
use tangle_types::TransactionId;

use crate::error::WalletError;
use crate::output::WalletOutput;

/// Fetches ledger state from a node on behalf of the wallet.
pub trait Connector {
    /// The unspent outputs the node currently knows for `addresses`, grouped
    /// by address and creating transaction.
    fn unspent_outputs(
        &self,
        addresses: &[Address],
    ) -> Result<HashMap<Address, HashMap<TransactionId, WalletOutput>>, WalletError>;
}

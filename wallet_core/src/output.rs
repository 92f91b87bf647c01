//! The wallet's view of one of its outputs.

use serde::{Deserialize, Serialize};

use tangle_ledger::{Address, ColoredBalances};
use tangle_types::OutputId;

/// What the wallet knows about an output's fate. `spent` may be set locally
/// before the node observes the spend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionState {
    pub spent: bool,
    pub confirmed: bool,
    pub rejected: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletOutput {
    pub address: Address,
    pub output_id: OutputId,
    pub balances: ColoredBalances,
    pub inclusion_state: InclusionState,
}

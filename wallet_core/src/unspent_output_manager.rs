//! Tracks the wallet's unspent outputs, layering local knowledge about
//! spends the node has not observed yet over the server's responses. Spending
//! an output locally and refreshing immediately afterwards must never make
//! the output look spendable again, or the wallet would double-spend its own
//! funds.

use std::collections::HashMap;

use tangle_ledger::Address;
use tangle_types::TransactionId;

use crate::connector::Connector;
use crate::error::WalletError;
use crate::output::WalletOutput;

/// Options for [`UnspentOutputManager::refresh`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RefreshOptions {
    /// Also re-scan addresses whose known outputs are all spent. Off by
    /// default: fully spent addresses rarely receive new funds.
    pub include_spent: bool,
}

pub struct UnspentOutputManager<C: Connector> {
    addresses: Vec<Address>,
    connector: C,
    unspent_outputs: HashMap<Address, HashMap<TransactionId, WalletOutput>>,
}

impl<C: Connector> UnspentOutputManager<C> {
    /// Create a manager for the wallet's addresses and run an initial full
    /// refresh.
    pub fn new(addresses: Vec<Address>, connector: C) -> Result<Self, WalletError> {
        let mut manager = Self {
            addresses,
            connector,
            unspent_outputs: HashMap::new(),
        };
        manager.refresh(RefreshOptions {
            include_spent: true,
        })?;
        Ok(manager)
    }

    /// Fetch the current unspent outputs from the node and merge them in.
    ///
    /// An output already marked spent locally keeps its spent flag, whatever
    /// the server says: the wallet may know about spends the node has not
    /// confirmed yet.
    pub fn refresh(&mut self, options: RefreshOptions) -> Result<(), WalletError> {
        let addresses_to_refresh = if options.include_spent {
            self.addresses.clone()
        } else {
            self.unspent_addresses()
        };

        let fetched = self.connector.unspent_outputs(&addresses_to_refresh)?;
        tracing::debug!(
            addresses = addresses_to_refresh.len(),
            "refreshed unspent outputs from node"
        );
        for (address, outputs) in fetched {
            for (transaction_id, mut output) in outputs {
                let known = self.unspent_outputs.entry(address).or_default();
                if let Some(existing) = known.get(&transaction_id) {
                    if existing.inclusion_state.spent {
                        output.inclusion_state.spent = true;
                    }
                }
                known.insert(transaction_id, output);
            }
        }
        Ok(())
    }

    /// The outputs that have not been spent yet, for the given addresses (all
    /// wallet addresses when `addresses` is empty).
    pub fn unspent_outputs(
        &self,
        addresses: &[Address],
    ) -> HashMap<Address, HashMap<TransactionId, WalletOutput>> {
        let addresses: Vec<Address> = if addresses.is_empty() {
            self.addresses.clone()
        } else {
            addresses.to_vec()
        };

        let mut result: HashMap<Address, HashMap<TransactionId, WalletOutput>> = HashMap::new();
        for address in addresses {
            let Some(outputs) = self.unspent_outputs.get(&address) else {
                continue;
            };
            for (transaction_id, output) in outputs {
                if output.inclusion_state.spent {
                    continue;
                }
                result
                    .entry(address)
                    .or_default()
                    .insert(*transaction_id, output.clone());
            }
        }
        result
    }

    /// Mark an output spent locally. Unknown addresses or transactions are
    /// silently ignored.
    pub fn mark_output_spent(&mut self, address: &Address, transaction_id: &TransactionId) {
        let Some(outputs) = self.unspent_outputs.get_mut(address) else {
            return;
        };
        let Some(output) = outputs.get_mut(transaction_id) else {
            return;
        };
        output.inclusion_state.spent = true;
    }

    /// The wallet's addresses.
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Addresses that still have (or may still have) something to spend: an
    /// address counts as fully spent only when every known output on it is
    /// spent.
    pub fn unspent_addresses(&self) -> Vec<Address> {
        self.addresses
            .iter()
            .filter(|address| {
                match self.unspent_outputs.get(address) {
                    Some(outputs) if !outputs.is_empty() => {
                        outputs.values().any(|o| !o.inclusion_state.spent)
                    }
                    // never scanned or nothing known: keep scanning it
                    _ => true,
                }
            })
            .copied()
            .collect()
    }
}

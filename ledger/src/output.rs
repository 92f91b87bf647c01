//! UTXO output variants and colored balances.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use tangle_store::StorageObject;
use tangle_types::{Color, OutputId, Timestamp};

use crate::address::Address;

/// A 32-byte alias identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AliasId(pub [u8; 32]);

impl fmt::Debug for AliasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AliasId(")?;
        for b in &self.0[..4] {
            write!(f, "{:02x}", b)?;
        }
        write!(f, "\u{2026})")
    }
}

/// Per-color token balances. A `BTreeMap` keeps the canonical encoding
/// deterministic regardless of insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoredBalances(BTreeMap<Color, u64>);

impl ColoredBalances {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-color balance map.
    pub fn single(color: Color, amount: u64) -> Self {
        let mut balances = BTreeMap::new();
        balances.insert(color, amount);
        Self(balances)
    }

    /// Plain IOTA balance.
    pub fn iota(amount: u64) -> Self {
        Self::single(Color::IOTA, amount)
    }

    pub fn with(mut self, color: Color, amount: u64) -> Self {
        self.0.insert(color, amount);
        self
    }

    pub fn get(&self, color: &Color) -> u64 {
        self.0.get(color).copied().unwrap_or(0)
    }

    /// Sum over all colors.
    pub fn total(&self) -> u128 {
        self.0.values().map(|&v| u128::from(v)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Color, &u64)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replace [`Color::MINT`] entries with the given concrete color. Applied
    /// at booking time with the color derived from the transaction ID.
    pub fn resolve_mint(&self, minted: Color) -> Self {
        let mut resolved = BTreeMap::new();
        for (&color, &amount) in &self.0 {
            let color = if color == Color::MINT { minted } else { color };
            *resolved.entry(color).or_insert(0) += amount;
        }
        Self(resolved)
    }
}

/// A UTXO. The tag decides which unlock rules apply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Output {
    /// A single IOTA balance bound to one address.
    SigLockedSingle { address: Address, amount: u64 },
    /// Arbitrary colored balances bound to one address.
    SigLockedColored {
        address: Address,
        balances: ColoredBalances,
    },
    /// A stateful alias controlled by a governance address.
    Alias {
        alias_id: AliasId,
        governance_address: Address,
        state_metadata: Vec<u8>,
        balances: ColoredBalances,
    },
    /// An address-bound output with optional timelock and fallback.
    Extended {
        address: Address,
        balances: ColoredBalances,
        timelock: Option<Timestamp>,
        fallback_address: Option<Address>,
    },
}

impl Output {
    /// The address whose signature unlocks this output.
    pub fn address(&self) -> &Address {
        match self {
            Output::SigLockedSingle { address, .. } => address,
            Output::SigLockedColored { address, .. } => address,
            Output::Alias {
                governance_address, ..
            } => governance_address,
            Output::Extended { address, .. } => address,
        }
    }

    /// The output's balances as a colored map.
    pub fn balances(&self) -> ColoredBalances {
        match self {
            Output::SigLockedSingle { amount, .. } => ColoredBalances::iota(*amount),
            Output::SigLockedColored { balances, .. } => balances.clone(),
            Output::Alias { balances, .. } => balances.clone(),
            Output::Extended { balances, .. } => balances.clone(),
        }
    }

    /// Rewrite MINT colors to the concrete minted color.
    pub fn resolve_mint(&self, minted: Color) -> Output {
        match self {
            Output::SigLockedSingle { .. } => self.clone(),
            Output::SigLockedColored { address, balances } => Output::SigLockedColored {
                address: *address,
                balances: balances.resolve_mint(minted),
            },
            Output::Alias {
                alias_id,
                governance_address,
                state_metadata,
                balances,
            } => Output::Alias {
                alias_id: *alias_id,
                governance_address: *governance_address,
                state_metadata: state_metadata.clone(),
                balances: balances.resolve_mint(minted),
            },
            Output::Extended {
                address,
                balances,
                timelock,
                fallback_address,
            } => Output::Extended {
                address: *address,
                balances: balances.resolve_mint(minted),
                timelock: *timelock,
                fallback_address: *fallback_address,
            },
        }
    }
}

/// An output together with its identifier, as stored in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: OutputId,
    pub output: Output,
}

impl StorageObject for OutputRecord {
    fn storage_key(&self) -> Vec<u8> {
        self.id.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressKind;
    use tangle_types::TransactionId;

    fn addr(byte: u8) -> Address {
        Address {
            kind: AddressKind::Ed25519,
            digest: [byte; 32],
        }
    }

    #[test]
    fn total_sums_all_colors() {
        let balances = ColoredBalances::iota(10).with(Color::new([2u8; 32]), 5);
        assert_eq!(balances.total(), 15);
        assert_eq!(balances.get(&Color::IOTA), 10);
        assert_eq!(balances.get(&Color::new([3u8; 32])), 0);
    }

    #[test]
    fn resolve_mint_rewrites_only_mint() {
        let minted = Color::new(*TransactionId::new([9u8; 32]).as_bytes());
        let balances = ColoredBalances::iota(10).with(Color::MINT, 5);
        let resolved = balances.resolve_mint(minted);
        assert_eq!(resolved.get(&Color::MINT), 0);
        assert_eq!(resolved.get(&minted), 5);
        assert_eq!(resolved.get(&Color::IOTA), 10);
    }

    #[test]
    fn single_output_balances_are_iota() {
        let output = Output::SigLockedSingle {
            address: addr(1),
            amount: 42,
        };
        assert_eq!(output.balances().get(&Color::IOTA), 42);
        assert_eq!(output.address(), &addr(1));
    }

    #[test]
    fn alias_unlocks_via_governance_address() {
        let output = Output::Alias {
            alias_id: AliasId([7u8; 32]),
            governance_address: addr(3),
            state_metadata: vec![1, 2, 3],
            balances: ColoredBalances::iota(1),
        };
        assert_eq!(output.address(), &addr(3));
    }
}

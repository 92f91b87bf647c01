//! UTXO transactions: essence, unlock blocks, and the colored-balance
//! conservation rule.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tangle_crypto::blake2b_256;
use tangle_types::{Color, NodeId, OutputId, Timestamp, TransactionId};

use crate::error::LedgerError;
use crate::output::{ColoredBalances, Output};
use crate::unlock::UnlockBlock;

pub const TRANSACTION_VERSION: u8 = 1;

/// Maximum number of inputs or outputs in one transaction.
pub const MAX_INPUT_COUNT: usize = 127;
pub const MAX_OUTPUT_COUNT: usize = 127;

/// The signed portion of a transaction. The transaction ID is the Blake2b-256
/// digest of the essence's canonical (bincode) encoding, so input and output
/// orderings are fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEssence {
    pub version: u8,
    pub timestamp: Timestamp,
    /// Identity the access mana of the moved funds is pledged to.
    pub access_pledge: NodeId,
    /// Identity the consensus mana of the moved funds is pledged to.
    pub consensus_pledge: NodeId,
    pub inputs: Vec<OutputId>,
    pub outputs: Vec<Output>,
    pub payload: Option<Vec<u8>>,
}

impl TransactionEssence {
    /// Build an essence with the canonical input ordering applied.
    ///
    /// Inputs are sorted and deduplicated here; unlock blocks must be built
    /// against the returned order.
    pub fn new(
        timestamp: Timestamp,
        access_pledge: NodeId,
        consensus_pledge: NodeId,
        mut inputs: Vec<OutputId>,
        outputs: Vec<Output>,
    ) -> Self {
        inputs.sort();
        inputs.dedup();
        Self {
            version: TRANSACTION_VERSION,
            timestamp,
            access_pledge,
            consensus_pledge,
            inputs,
            outputs,
            payload: None,
        }
    }

    /// The digest signatures cover; also the transaction ID's byte content.
    pub fn digest(&self) -> [u8; 32] {
        let bytes = bincode::serialize(self).expect("essence serialization cannot fail");
        blake2b_256(&bytes)
    }
}

/// A transaction: essence plus one unlock block per input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub essence: TransactionEssence,
    pub unlocks: Vec<UnlockBlock>,
}

impl Transaction {
    /// Assemble and structurally validate a transaction.
    pub fn new(essence: TransactionEssence, unlocks: Vec<UnlockBlock>) -> Result<Self, LedgerError> {
        if essence.version != TRANSACTION_VERSION {
            return Err(LedgerError::InvalidTransaction(format!(
                "unsupported version {}",
                essence.version
            )));
        }
        if essence.inputs.is_empty() || essence.inputs.len() > MAX_INPUT_COUNT {
            return Err(LedgerError::InvalidTransaction(format!(
                "input count {} out of range",
                essence.inputs.len()
            )));
        }
        if essence.outputs.is_empty() || essence.outputs.len() > MAX_OUTPUT_COUNT {
            return Err(LedgerError::InvalidTransaction(format!(
                "output count {} out of range",
                essence.outputs.len()
            )));
        }
        if !essence.inputs.windows(2).all(|pair| pair[0] < pair[1]) {
            return Err(LedgerError::InvalidTransaction(
                "inputs are not in canonical order".into(),
            ));
        }
        if unlocks.len() != essence.inputs.len() {
            return Err(LedgerError::InvalidTransaction(format!(
                "{} unlock blocks for {} inputs",
                unlocks.len(),
                essence.inputs.len()
            )));
        }
        Ok(Self { essence, unlocks })
    }

    pub fn id(&self) -> TransactionId {
        TransactionId::new(self.essence.digest())
    }

    /// The fresh color this transaction mints under, when an output carries
    /// [`Color::MINT`].
    pub fn minted_color(&self) -> Color {
        Color::new(*self.id().as_bytes())
    }
}

/// Check colored-balance conservation between consumed and created balances.
///
/// Grand totals must match exactly. Per color: MINT is funded from IOTA and
/// any non-IOTA color may shrink (the shortfall returns as IOTA), but no
/// pre-existing color may grow out of nothing.
pub fn balances_valid(consumed: &[ColoredBalances], created: &[Output]) -> bool {
    let mut consumed_totals: BTreeMap<Color, u128> = BTreeMap::new();
    for balances in consumed {
        for (&color, &amount) in balances.iter() {
            *consumed_totals.entry(color).or_insert(0) += u128::from(amount);
        }
    }

    let mut created_totals: BTreeMap<Color, u128> = BTreeMap::new();
    for output in created {
        for (&color, &amount) in output.balances().iter() {
            *created_totals.entry(color).or_insert(0) += u128::from(amount);
        }
    }

    let consumed_grand: u128 = consumed_totals.values().sum();
    let created_grand: u128 = created_totals.values().sum();
    if consumed_grand != created_grand {
        return false;
    }

    let iota_available = consumed_totals.get(&Color::IOTA).copied().unwrap_or(0);
    for (&color, &amount) in &created_totals {
        if color == Color::IOTA {
            continue;
        }
        let available = if color == Color::MINT {
            iota_available
        } else {
            consumed_totals.get(&color).copied().unwrap_or(0)
        };
        if amount > available {
            return false;
        }
    }

    true
}

//! Content-addressed identifier types for the message DAG and the ledger.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            pub fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_vec(&self) -> Vec<u8> {
                self.0.to_vec()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "("))?;
                for b in &self.0[..4] {
                    write!(f, "{:02x}", b)?;
                }
                write!(f, "\u{2026})")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in &self.0 {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    };
}

id_type! {
    /// A 32-byte message identifier — the Blake2b-256 digest of the message's
    /// canonical encoding.
    MessageId
}

id_type! {
    /// A 32-byte transaction identifier — the Blake2b-256 digest of the
    /// transaction essence.
    TransactionId
}

id_type! {
    /// A 32-byte branch identifier. Conflict branches reuse the identifier of
    /// the transaction that created them; aggregated branches are digests of
    /// their sorted members.
    BranchId
}

id_type! {
    /// A 32-byte node identity — the digest of the issuer's public key.
    NodeId
}

id_type! {
    /// A 32-byte token color. [`Color::IOTA`] is the base token,
    /// [`Color::MINT`] requests a fresh color at booking time.
    Color
}

impl MessageId {
    /// The empty message ID — the genesis. Vacuously solid.
    pub const EMPTY: Self = Self([0u8; 32]);

    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl TransactionId {
    pub const ZERO: Self = Self([0u8; 32]);
}

impl BranchId {
    /// The master branch — the unique root of the branch DAG, always liked.
    pub const MASTER: Self = {
        let mut bytes = [0u8; 32];
        bytes[0] = 1;
        Self(bytes)
    };
}

impl NodeId {
    pub const ZERO: Self = Self([0u8; 32]);
}

impl Color {
    /// The uncolored base token.
    pub const IOTA: Self = Self([0u8; 32]);

    /// Pseudo-color requesting a fresh color (derived from the transaction ID)
    /// when the output is booked.
    pub const MINT: Self = Self([0xFF; 32]);
}

/// A UTXO identifier: the creating transaction plus the output's index within
/// that transaction's output list.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputId {
    pub transaction_id: TransactionId,
    pub index: u16,
}

impl OutputId {
    pub fn new(transaction_id: TransactionId, index: u16) -> Self {
        Self {
            transaction_id,
            index,
        }
    }

    /// Binary key form: transaction id bytes followed by the big-endian index.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(34);
        bytes.extend_from_slice(self.transaction_id.as_bytes());
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({:?}:{})", self.transaction_id, self.index)
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.index)
    }
}

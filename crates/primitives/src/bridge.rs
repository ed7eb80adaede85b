//! Types that identify and describe deposits into the federation.

use std::{fmt, str::FromStr};

use arbitrary::Arbitrary;
use bitcoin::{Amount, Txid};
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::buf::Buf32;

/// Identifies a cross-chain transfer by the id of the deposit transaction on the counter-chain.
#[derive(
    Copy,
    Clone,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct DepositId(Buf32);

impl DepositId {
    pub fn new(id: Buf32) -> Self {
        Self(id)
    }

    pub fn inner(&self) -> &Buf32 {
        &self.0
    }
}

impl From<Txid> for DepositId {
    fn from(value: Txid) -> Self {
        Self(value.into())
    }
}

impl From<Buf32> for DepositId {
    fn from(value: Buf32) -> Self {
        Self(value)
    }
}

impl From<[u8; 32]> for DepositId {
    fn from(value: [u8; 32]) -> Self {
        Self(value.into())
    }
}

impl fmt::Debug for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DepositId({})", self.0)
    }
}

impl fmt::Display for DepositId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for DepositId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// A deposit found in a counter-chain block that pays into the federation multisig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
    id: DepositId,
    amount: Amount,
    target_address: String,
}

impl Deposit {
    pub fn new(id: DepositId, amount: Amount, target_address: impl Into<String>) -> Self {
        Self {
            id,
            amount,
            target_address: target_address.into(),
        }
    }

    pub fn id(&self) -> &DepositId {
        &self.id
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Destination of the withdrawal on the tracked chain, as supplied by the depositor.
    pub fn target_address(&self) -> &str {
        &self.target_address
    }
}

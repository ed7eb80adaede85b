//! Federation parameters, read-only to everything that consumes them.

use bitcoin::{Network, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::{errors::ParseError, multisig::MultisigScript};

/// Which of the two bridged chains a component is following.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainRole {
    Mainchain,
    Sidechain,
}

impl ChainRole {
    /// The chain on the other side of the bridge.
    pub fn counter_chain(&self) -> Self {
        match self {
            Self::Mainchain => Self::Sidechain,
            Self::Sidechain => Self::Mainchain,
        }
    }
}

/// Parameters shared by every member of the federation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FederationParams {
    multisig: MultisigScript,
    network: Network,
    tracked_chain: ChainRole,
}

impl FederationParams {
    /// Creates the params, checking that `threshold` agrees with the redeem script.
    pub fn new(
        redeem_script: ScriptBuf,
        threshold: usize,
        network: Network,
        tracked_chain: ChainRole,
    ) -> Result<Self, ParseError> {
        let multisig = MultisigScript::from_script(&redeem_script)?;
        if multisig.threshold() != threshold {
            return Err(ParseError::ThresholdMismatch {
                configured: threshold,
                script: multisig.threshold(),
            });
        }

        Ok(Self {
            multisig,
            network,
            tracked_chain,
        })
    }

    pub fn from_multisig(
        multisig: MultisigScript,
        network: Network,
        tracked_chain: ChainRole,
    ) -> Self {
        Self {
            multisig,
            network,
            tracked_chain,
        }
    }

    pub fn multisig(&self) -> &MultisigScript {
        &self.multisig
    }

    /// Number of federation signatures needed to spend from the multisig address.
    pub fn threshold(&self) -> usize {
        self.multisig.threshold()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn tracked_chain(&self) -> ChainRole {
        self.tracked_chain
    }
}

//! Errors during parsing/handling/conversion of primitives.

use bitcoin::{secp256k1, ScriptBuf};
use thiserror::Error;

/// Parsing errors that can occur with bridge primitives,
/// such as pubkeys and federation scripts.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// The provided pubkey is invalid.
    #[error("supplied pubkey is invalid")]
    InvalidPubkey(#[from] secp256k1::Error),

    /// The provided script is not a standard `m-of-n` `OP_CHECKMULTISIG` script.
    #[error("not a multisig script: {0}")]
    NotMultisig(ScriptBuf),

    /// The threshold is zero or exceeds the number of keys.
    #[error("invalid threshold {threshold} for {keys} keys")]
    InvalidThreshold { threshold: usize, keys: usize },

    /// The configured threshold disagrees with the one committed in the redeem script.
    #[error("configured threshold {configured} does not match redeem script threshold {script}")]
    ThresholdMismatch { configured: usize, script: usize },

    /// The provided hex string could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}

impl From<hex::FromHexError> for ParseError {
    fn from(value: hex::FromHexError) -> Self {
        Self::InvalidHex(value.to_string())
    }
}

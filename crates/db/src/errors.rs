use rockbound::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    /// The next mature deposit height moved while the batch was being built.
    #[error("next mature deposit height is {found:?}, batch expected {expected:?}")]
    MatureHeightConflict {
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("codec: {0}")]
    CodecError(String),

    #[error("transaction error: {0}")]
    TransactionError(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for DbError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<CodecError> for DbError {
    fn from(value: CodecError) -> Self {
        Self::CodecError(value.to_string())
    }
}

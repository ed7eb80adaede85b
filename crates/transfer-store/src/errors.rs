use fedpeg_db::{
    entities::{cross_chain_transfer::TransferStatus, errors::EntityError},
    errors::DbError,
};
use fedpeg_primitives::{bridge::DepositId, l1::BlockRef};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transfer store used before initialization")]
    NotInitialized,

    #[error("deposit {deposit_id} matured at {got}, expected height {expected}")]
    DepositHeightMismatch {
        deposit_id: DepositId,
        expected: u64,
        got: u64,
    },

    #[error("deposit {deposit_id} recorded as {status}, expected partial")]
    UnexpectedStatus {
        deposit_id: DepositId,
        status: TransferStatus,
    },

    #[error("deposit {0} carries no deposit info")]
    MissingDepositInfo(DepositId),

    #[error("deposit {0} appears twice in the batch")]
    DuplicateDeposit(DepositId),

    #[error("block at height {0} does not extend the previous one")]
    NonContiguousBlocks(u64),

    #[error("blocks lead to {got}, expected {expected}")]
    TipMismatch { expected: BlockRef, got: BlockRef },

    #[error("tracked chain has no genesis block")]
    MissingGenesis,

    #[error("indexed transfer {0} is missing from the database")]
    MissingTransfer(DepositId),

    #[error("entity: {0}")]
    Entity(#[from] EntityError),

    #[error("db: {0}")]
    Db(#[from] DbError),

    #[error("worker: {0}")]
    Worker(String),
}

use bitcoin::Txid;
use fedpeg_primitives::bridge::DepositId;
use thiserror::Error;

use super::cross_chain_transfer::TransferStatus;

#[derive(Debug, Clone, Error)]
pub enum EntityError {
    #[error("failed to update cross-chain transfer due to {0}")]
    TransferError(#[from] TransferError),
}

pub type EntityResult<T> = Result<T, EntityError>;

#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("transfer {deposit_id} cannot move from {from} to {to}")]
    InvalidTransition {
        deposit_id: DepositId,
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("partial transaction {got} does not match the tracked withdrawal {expected}")]
    MismatchedTransaction { expected: Txid, got: Txid },

    #[error("input {input} carries {have} of the {need} required signatures")]
    NotEnoughSignatures {
        input: usize,
        have: usize,
        need: usize,
    },
}

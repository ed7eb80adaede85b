//! Trait definitions for low level database interfaces and for the chain data the store
//! consumes.

use bitcoin::{Block, BlockHash, Transaction};
use fedpeg_primitives::{
    bridge::{Deposit, DepositId},
    l1::BlockRef,
};

use crate::{
    entities::cross_chain_transfer::CrossChainTransfer, types::TransferWriteBatch, DbResult,
};

/// Database interface for cross-chain transfers and the store's sync metadata.
/// Operations are NOT VALIDATED at this level.
/// Ensure all operations are done through `CrossChainTransferStore`.
pub trait TransferDatabase {
    /// Fetches a single transfer.
    fn get_transfer(&self, deposit_id: &DepositId) -> DbResult<Option<CrossChainTransfer>>;

    /// Fetches transfers in the order of `deposit_ids`, with `None` for the ones not stored.
    fn get_transfers(&self, deposit_ids: &[DepositId])
        -> DbResult<Vec<Option<CrossChainTransfer>>>;

    /// Loads every stored transfer, ordered by deposit id.
    fn get_all_transfers(&self) -> DbResult<Vec<CrossChainTransfer>>;

    /// Gets the last block of the tracked chain that has been fully processed.
    fn get_tip(&self) -> DbResult<Option<BlockRef>>;

    /// Gets the counter-chain height the next batch of mature deposits must come from.
    fn get_next_mature_deposit_height(&self) -> DbResult<Option<u64>>;

    /// Atomically applies all writes in the batch.
    ///
    /// # Errors
    ///
    /// If the batch updates the next mature deposit height and the stored value differs from the
    /// one the batch expects, nothing is written.
    fn write_batch(&self, batch: TransferWriteBatch) -> DbResult<()>;
}

/// Read-only view of the best chain of the tracked chain, as known to the local node.
pub trait ChainView {
    /// Current best block.
    fn tip(&self) -> BlockRef;

    /// Hash of the block at `height` on the best chain.
    fn block_hash_at(&self, height: u64) -> Option<BlockHash>;

    /// Height of `hash` if the block is on the best chain.
    fn height_of(&self, hash: &BlockHash) -> Option<u64>;
}

/// Retrieves full blocks of the tracked chain.
pub trait BlockSource {
    /// Returns blocks in the order of `hashes`, with `None` for those not available.
    fn get_blocks(&self, hashes: &[BlockHash]) -> Vec<Option<Block>>;
}

/// Finds deposits into the federation in blocks of the counter-chain.
pub trait DepositExtractor {
    /// Deposits made in `block`, which sits at `height` on the counter-chain.
    fn extract_deposits(&self, block: &Block, height: u64) -> Vec<Deposit>;
}

/// Maps a withdrawal transaction back to the deposit it pays out.
pub trait WithdrawalCorrelator {
    fn try_get_deposit_reference(&self, tx: &Transaction) -> Option<DepositId>;
}

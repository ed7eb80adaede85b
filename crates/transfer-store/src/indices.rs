//! In-memory lookups derived from the transfer table.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::BlockHash;
use fedpeg_db::entities::cross_chain_transfer::{CrossChainTransfer, TransferStatus};
use fedpeg_primitives::{bridge::DepositId, l1::BlockRef};

/// Indices over the persisted transfers.
///
/// These are never a source of truth. They are rebuilt from the transfer table on startup and
/// otherwise only changed alongside a committed write, so rebuilding at any point yields an equal
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Indices {
    by_status: BTreeMap<TransferStatus, BTreeSet<DepositId>>,
    by_block_hash: BTreeMap<BlockHash, BTreeSet<DepositId>>,
    block_heights: BTreeMap<BlockHash, u64>,
}

impl Indices {
    pub fn from_transfers<'a>(transfers: impl IntoIterator<Item = &'a CrossChainTransfer>) -> Self {
        let mut indices = Self::default();
        for transfer in transfers {
            indices.insert(transfer);
        }
        indices
    }

    pub fn insert(&mut self, transfer: &CrossChainTransfer) {
        let deposit_id = *transfer.deposit_id();

        self.by_status
            .entry(transfer.status())
            .or_default()
            .insert(deposit_id);

        if let Some(block) = transfer.block() {
            self.by_block_hash
                .entry(*block.hash())
                .or_default()
                .insert(deposit_id);
            self.block_heights.insert(*block.hash(), block.height());
        }
    }

    /// Removes the entries for `transfer` as it was last inserted.
    pub fn remove(&mut self, transfer: &CrossChainTransfer) {
        let deposit_id = transfer.deposit_id();

        if let Some(ids) = self.by_status.get_mut(&transfer.status()) {
            ids.remove(deposit_id);
            if ids.is_empty() {
                self.by_status.remove(&transfer.status());
            }
        }

        if let Some(block) = transfer.block() {
            if let Some(ids) = self.by_block_hash.get_mut(block.hash()) {
                ids.remove(deposit_id);
                if ids.is_empty() {
                    self.by_block_hash.remove(block.hash());
                    self.block_heights.remove(block.hash());
                }
            }
        }
    }

    /// Replaces the entries of `old` with those of `new`, both versions of the same transfer.
    pub fn update(&mut self, old: &CrossChainTransfer, new: &CrossChainTransfer) {
        self.remove(old);
        self.insert(new);
    }

    pub fn ids_with_status(&self, status: TransferStatus) -> impl Iterator<Item = &DepositId> {
        self.by_status.get(&status).into_iter().flatten()
    }

    pub fn count(&self, status: TransferStatus) -> usize {
        self.by_status.get(&status).map_or(0, BTreeSet::len)
    }

    pub fn ids_in_block(&self, hash: &BlockHash) -> impl Iterator<Item = &DepositId> {
        self.by_block_hash.get(hash).into_iter().flatten()
    }

    pub fn block_height(&self, hash: &BlockHash) -> Option<u64> {
        self.block_heights.get(hash).copied()
    }

    /// Deposits whose withdrawal was seen in an indexed block above `height`.
    pub fn ids_above(&self, height: u64) -> Vec<DepositId> {
        self.block_heights
            .iter()
            .filter(|(_, h)| **h > height)
            .flat_map(|(hash, _)| self.ids_in_block(hash))
            .copied()
            .collect()
    }

    /// Highest indexed block for which `on_chain` holds.
    pub fn highest_block_where(&self, mut on_chain: impl FnMut(&BlockRef) -> bool) -> Option<BlockRef> {
        let mut blocks: Vec<BlockRef> = self
            .block_heights
            .iter()
            .map(|(hash, height)| BlockRef::new(*hash, *height))
            .collect();
        blocks.sort_by_key(|block| std::cmp::Reverse(block.height()));

        blocks.into_iter().find(|block| on_chain(block))
    }
}

//! Module for database local types

use fedpeg_primitives::l1::BlockRef;

use crate::entities::cross_chain_transfer::CrossChainTransfer;

/// Set of writes that are committed atomically by [`TransferDatabase::write_batch`].
///
/// [`TransferDatabase::write_batch`]: crate::traits::TransferDatabase::write_batch
#[derive(Debug, Clone, Default)]
pub struct TransferWriteBatch {
    transfers: Vec<CrossChainTransfer>,
    tip: Option<BlockRef>,
    next_mature_height: Option<MatureHeightUpdate>,
}

/// Compare-and-set of the next mature deposit height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatureHeightUpdate {
    /// Value the counter must hold when the batch commits, `None` if it was never written.
    pub expected: Option<u64>,
    pub new: u64,
}

impl TransferWriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a transfer, keyed by its deposit id.
    pub fn put_transfer(&mut self, transfer: CrossChainTransfer) {
        self.transfers.push(transfer);
    }

    pub fn set_tip(&mut self, tip: BlockRef) {
        self.tip = Some(tip);
    }

    pub fn set_next_mature_height(&mut self, expected: Option<u64>, new: u64) {
        self.next_mature_height = Some(MatureHeightUpdate { expected, new });
    }

    pub fn transfers(&self) -> &[CrossChainTransfer] {
        &self.transfers
    }

    pub fn tip(&self) -> Option<&BlockRef> {
        self.tip.as_ref()
    }

    pub fn next_mature_height(&self) -> Option<&MatureHeightUpdate> {
        self.next_mature_height.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty() && self.tip.is_none() && self.next_mature_height.is_none()
    }
}

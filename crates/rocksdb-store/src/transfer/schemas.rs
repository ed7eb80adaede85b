use fedpeg_db::entities::cross_chain_transfer::CrossChainTransfer;
use fedpeg_primitives::{bridge::DepositId, l1::BlockRef};

use crate::{define_table_with_default_codec, define_table_without_codec, impl_borsh_value_codec};

define_table_with_default_codec!(
    /// A table to map [`DepositId`]s to their [`CrossChainTransfer`].
    (TransferSchema) DepositId => CrossChainTransfer
);

define_table_with_default_codec!(
    /// A single row table holding the last processed block of the tracked chain.
    (SyncTipSchema) u64 => BlockRef
);

define_table_with_default_codec!(
    /// A single row table holding the counter-chain height of the next batch of mature deposits.
    (NextMatureHeightSchema) u64 => u64
);

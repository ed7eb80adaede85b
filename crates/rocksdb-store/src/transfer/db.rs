use std::sync::Arc;

use fedpeg_db::{
    entities::cross_chain_transfer::CrossChainTransfer, errors::DbError,
    traits::TransferDatabase, types::TransferWriteBatch, DbResult,
};
use fedpeg_primitives::{bridge::DepositId, l1::BlockRef};
use rockbound::{OptimisticTransactionDB as DB, SchemaDBOperationsExt, TransactionRetry};
use tracing::*;

use super::schemas::{NextMatureHeightSchema, SyncTipSchema, TransferSchema};
use crate::DbOpsConfig;

/// Key of the single row in [`SyncTipSchema`] and [`NextMatureHeightSchema`].
const META_KEY: u64 = 0;

pub struct TransferRocksDb {
    db: Arc<DB>,
    ops: DbOpsConfig,
}

impl TransferRocksDb {
    pub fn new(db: Arc<DB>, ops: DbOpsConfig) -> Self {
        Self { db, ops }
    }
}

impl TransferDatabase for TransferRocksDb {
    fn get_transfer(&self, deposit_id: &DepositId) -> DbResult<Option<CrossChainTransfer>> {
        Ok(self.db.get::<TransferSchema>(deposit_id)?)
    }

    fn get_transfers(
        &self,
        deposit_ids: &[DepositId],
    ) -> DbResult<Vec<Option<CrossChainTransfer>>> {
        deposit_ids
            .iter()
            .map(|deposit_id| self.get_transfer(deposit_id))
            .collect()
    }

    fn get_all_transfers(&self) -> DbResult<Vec<CrossChainTransfer>> {
        let mut transfers = Vec::new();
        for res in self.db.iter::<TransferSchema>()? {
            let (_, transfer) = res?.into_tuple();
            transfers.push(transfer);
        }

        Ok(transfers)
    }

    fn get_tip(&self) -> DbResult<Option<BlockRef>> {
        Ok(self.db.get::<SyncTipSchema>(&META_KEY)?)
    }

    fn get_next_mature_deposit_height(&self) -> DbResult<Option<u64>> {
        Ok(self.db.get::<NextMatureHeightSchema>(&META_KEY)?)
    }

    fn write_batch(&self, batch: TransferWriteBatch) -> DbResult<()> {
        let conflict = self
            .db
            .with_optimistic_txn(TransactionRetry::Count(self.ops.retry_count), |txn| {
                if let Some(update) = batch.next_mature_height() {
                    let found = txn.get_for_update::<NextMatureHeightSchema>(&META_KEY)?;
                    if found != update.expected {
                        // leave the transaction empty so nothing else lands
                        return Ok::<_, DbError>(Some((update.expected, found)));
                    }

                    txn.put::<NextMatureHeightSchema>(&META_KEY, &update.new)?;
                }

                for transfer in batch.transfers() {
                    txn.put::<TransferSchema>(transfer.deposit_id(), transfer)?;
                }

                if let Some(tip) = batch.tip() {
                    txn.put::<SyncTipSchema>(&META_KEY, tip)?;
                }

                Ok(None)
            })
            .map_err(|e: rockbound::TransactionError<_>| DbError::TransactionError(e.to_string()))?;

        if let Some((expected, found)) = conflict {
            warn!(?expected, ?found, "next mature deposit height changed, dropping batch");
            return Err(DbError::MatureHeightConflict { expected, found });
        }

        Ok(())
    }
}

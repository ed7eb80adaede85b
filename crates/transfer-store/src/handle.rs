use std::sync::Arc;

use bitcoin::{Block, Transaction};
use fedpeg_db::{
    entities::cross_chain_transfer::CrossChainTransfer,
    traits::{BlockSource, ChainView, TransferDatabase, WithdrawalCorrelator},
};
use fedpeg_primitives::{
    bridge::DepositId,
    l1::{BitcoinPsbt, BlockRef},
};
use parking_lot::{Mutex, MutexGuard};
use threadpool::ThreadPool;

use crate::{
    errors::StoreResult,
    exec::exec_async,
    store::{CrossChainTransferStore, MergeOutcome},
};

/// Shares a [`CrossChainTransferStore`] between tasks.
///
/// Calls are serialized on the store's lock and run on the thread pool, so async callers never
/// block on database I/O.
pub struct TransferStoreHandle<D, C, B, W> {
    pool: ThreadPool,
    store: Arc<Mutex<CrossChainTransferStore<D, C, B, W>>>,
}

impl<D, C, B, W> Clone for TransferStoreHandle<D, C, B, W> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            store: self.store.clone(),
        }
    }
}

impl<D, C, B, W> TransferStoreHandle<D, C, B, W>
where
    D: TransferDatabase + Sync + Send + 'static,
    C: ChainView + Sync + Send + 'static,
    B: BlockSource + Sync + Send + 'static,
    W: WithdrawalCorrelator + Sync + Send + 'static,
{
    pub fn new(pool: ThreadPool, store: CrossChainTransferStore<D, C, B, W>) -> Self {
        Self {
            pool,
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Locks the store for direct, blocking use.
    pub fn lock(&self) -> MutexGuard<'_, CrossChainTransferStore<D, C, B, W>> {
        self.store.lock()
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&mut CrossChainTransferStore<D, C, B, W>) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        exec_async(&self.pool, move || op(&mut store.lock())).await
    }

    pub async fn initialize_async(&self) -> StoreResult<()> {
        self.run(|store| store.initialize()).await
    }

    pub async fn start_async(&self) -> StoreResult<bool> {
        self.run(|store| store.start()).await
    }

    pub async fn tip_async(&self) -> StoreResult<Option<BlockRef>> {
        self.run(|store| store.tip()).await
    }

    pub async fn next_mature_deposit_height_async(&self) -> StoreResult<u64> {
        self.run(|store| store.next_mature_deposit_height()).await
    }

    pub async fn get_async(
        &self,
        deposit_ids: Vec<DepositId>,
    ) -> StoreResult<Vec<Option<CrossChainTransfer>>> {
        self.run(move |store| store.get(&deposit_ids)).await
    }

    pub async fn transactions_to_broadcast_async(&self) -> StoreResult<Vec<Transaction>> {
        self.run(|store| store.transactions_to_broadcast()).await
    }

    pub async fn record_latest_mature_deposits_async(
        &self,
        transfers: Vec<CrossChainTransfer>,
    ) -> StoreResult<()> {
        self.run(move |store| store.record_latest_mature_deposits(transfers))
            .await
    }

    pub async fn put_async(&self, new_tip: BlockRef, blocks: Vec<Block>) -> StoreResult<()> {
        self.run(move |store| store.put(new_tip, &blocks)).await
    }

    pub async fn rewind_if_required_async(&self) -> StoreResult<bool> {
        self.run(|store| store.rewind_if_required()).await
    }

    pub async fn synchronize_async(&self) -> StoreResult<bool> {
        self.run(|store| store.synchronize()).await
    }

    pub async fn synchronize_with_cancel_async<F>(&self, is_cancelled: F) -> StoreResult<bool>
    where
        F: Fn() -> bool + Send + 'static,
    {
        self.run(move |store| store.synchronize_with_cancel(is_cancelled))
            .await
    }

    pub async fn merge_transaction_signatures_async(
        &self,
        deposit_id: DepositId,
        partials: Vec<BitcoinPsbt>,
    ) -> StoreResult<MergeOutcome> {
        self.run(move |store| store.merge_transaction_signatures(&deposit_id, &partials))
            .await
    }

    pub async fn set_rejected_status_async(
        &self,
        tx: Transaction,
    ) -> StoreResult<Option<DepositId>> {
        self.run(move |store| store.set_rejected_status(&tx)).await
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{Amount, Network};
    use fedpeg_db::entities::cross_chain_transfer::TransferStatus;
    use fedpeg_primitives::{bridge::Deposit, params::{ChainRole, FederationParams}};
    use fedpeg_rocksdb::{test_utils::get_rocksdb_tmp_instance, TransferRocksDb};
    use fedpeg_test_utils::{
        bridge::{collect_partials, create_withdrawal_psbt_for, generate_multisig},
        chain::MockChain,
        ArbitraryGenerator,
    };

    use super::*;
    use crate::{correlator::OpReturnCorrelator, store::StoreConfig, StoreError};

    #[tokio::test]
    async fn test_handle_roundtrip() {
        let (rbdb, ops, _dir) = get_rocksdb_tmp_instance().unwrap();
        let db = Arc::new(TransferRocksDb::new(rbdb, ops));
        let chain = Arc::new(MockChain::new());
        let (keys, multisig) = generate_multisig(2, 3);
        let params =
            FederationParams::from_multisig(multisig.clone(), Network::Regtest, ChainRole::Mainchain);

        let store = CrossChainTransferStore::new(
            db,
            chain.clone(),
            chain.clone(),
            Arc::new(OpReturnCorrelator),
            params,
            StoreConfig::default(),
        );
        let handle = TransferStoreHandle::new(ThreadPool::new(2), store);

        assert!(matches!(
            handle.tip_async().await,
            Err(StoreError::NotInitialized)
        ));

        handle.initialize_async().await.unwrap();
        assert!(handle.start_async().await.unwrap());
        assert_eq!(handle.tip_async().await.unwrap(), Some(chain.genesis()));

        let arb = ArbitraryGenerator::new();
        let deposit = Deposit::new(arb.generate(), Amount::from_sat(900), "addr");
        let psbt = create_withdrawal_psbt_for(&multisig, deposit.id(), deposit.amount());
        let partials = collect_partials(&psbt, &multisig, &keys);
        let transfer = CrossChainTransfer::new_partial(&deposit, 0, psbt);

        handle
            .record_latest_mature_deposits_async(vec![transfer])
            .await
            .unwrap();
        assert_eq!(handle.next_mature_deposit_height_async().await.unwrap(), 1);

        let outcome = handle
            .merge_transaction_signatures_async(*deposit.id(), partials)
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::FullySigned);

        let to_broadcast = handle.transactions_to_broadcast_async().await.unwrap();
        assert_eq!(to_broadcast.len(), 1);

        chain.mine(to_broadcast);
        assert!(handle.synchronize_async().await.unwrap());

        let fetched = handle.get_async(vec![*deposit.id()]).await.unwrap();
        assert_eq!(
            fetched[0].as_ref().map(|t| t.status()),
            Some(TransferStatus::SeenInBlock)
        );
        assert_eq!(
            handle.lock().transfer_ids_with_status(TransferStatus::SeenInBlock).unwrap(),
            vec![*deposit.id()]
        );
    }
}

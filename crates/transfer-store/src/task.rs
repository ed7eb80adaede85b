use std::time::Duration;

use fedpeg_db::traits::{BlockSource, ChainView, TransferDatabase, WithdrawalCorrelator};
use tokio::sync::watch;
use tracing::*;

use crate::{errors::StoreResult, handle::TransferStoreHandle};

/// Keeps the store following the tracked chain until `shutdown` turns true or its sender is
/// dropped.
///
/// Errors from a pass are logged and retried on the next tick.
pub async fn sync_task<D, C, B, W>(
    handle: TransferStoreHandle<D, C, B, W>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> StoreResult<()>
where
    D: TransferDatabase + Sync + Send + 'static,
    C: ChainView + Sync + Send + 'static,
    B: BlockSource + Sync + Send + 'static,
    W: WithdrawalCorrelator + Sync + Send + 'static,
{
    info!(?poll_interval, "starting transfer store sync task");
    let interval = tokio::time::interval(poll_interval);
    tokio::pin!(interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {}

            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let cancel = shutdown.clone();
        match handle
            .synchronize_with_cancel_async(move || *cancel.borrow())
            .await
        {
            Ok(true) => trace!("transfer store in sync"),
            Ok(false) => debug!("transfer store behind tracked chain"),
            Err(e) => error!(%e, "failed to synchronize transfer store"),
        }
    }

    info!("transfer store sync task exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bitcoin::Network;
    use fedpeg_primitives::params::{ChainRole, FederationParams};
    use fedpeg_rocksdb::{test_utils::get_rocksdb_tmp_instance, TransferRocksDb};
    use fedpeg_test_utils::{bridge::generate_multisig, chain::MockChain};
    use threadpool::ThreadPool;

    use super::*;
    use crate::{correlator::OpReturnCorrelator, store::StoreConfig, CrossChainTransferStore};

    #[tokio::test]
    async fn test_sync_task_follows_chain_until_shutdown() {
        let (rbdb, ops, _dir) = get_rocksdb_tmp_instance().unwrap();
        let chain = Arc::new(MockChain::new());
        let (_, multisig) = generate_multisig(2, 3);

        let mut store = CrossChainTransferStore::new(
            Arc::new(TransferRocksDb::new(rbdb, ops)),
            chain.clone(),
            chain.clone(),
            Arc::new(OpReturnCorrelator),
            FederationParams::from_multisig(multisig, Network::Regtest, ChainRole::Sidechain),
            StoreConfig::default(),
        );
        store.initialize().unwrap();
        let handle = TransferStoreHandle::new(ThreadPool::new(1), store);

        let tip = chain.mine_to(250);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(sync_task(
            handle.clone(),
            Duration::from_millis(10),
            shutdown_rx,
        ));

        let mut synced = false;
        for _ in 0..200 {
            if handle.tip_async().await.unwrap() == Some(tip) {
                synced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(synced);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }
}

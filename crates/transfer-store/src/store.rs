//! The cross-chain transfer store engine.
//!
//! Every mutating call builds a [`TransferWriteBatch`] against a copy of the [`Indices`], commits
//! the batch in one database transaction and only then swaps in the updated in-memory state. A
//! failed commit therefore leaves both durable and in-memory state untouched.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use bitcoin::{Block, BlockHash, Transaction};
use fedpeg_db::{
    entities::cross_chain_transfer::{CrossChainTransfer, TransferStatus},
    traits::{BlockSource, ChainView, TransferDatabase, WithdrawalCorrelator},
    types::TransferWriteBatch,
};
use fedpeg_primitives::{
    bridge::DepositId,
    l1::{BitcoinPsbt, BlockRef},
    params::FederationParams,
};
use tracing::*;

use crate::{
    errors::{StoreError, StoreResult},
    indices::Indices,
};

/// Default number of blocks requested per synchronization step.
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 100;

#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    /// Max number of blocks handed to [`CrossChainTransferStore::put`] at once while syncing.
    pub sync_batch_size: usize,

    /// Counter-chain height of the first batch of mature deposits, used until one is recorded.
    pub deposit_start_height: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
            deposit_start_height: 0,
        }
    }
}

/// Result of [`CrossChainTransferStore::merge_transaction_signatures`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeOutcome {
    /// No transfer is tracked for the deposit.
    NotFound,

    /// Signatures were merged but some input is still below the threshold.
    Partial { signatures: usize },

    /// Quorum was reached and the withdrawal is ready to broadcast.
    FullySigned,

    /// The transfer no longer collects signatures.
    NotPartial(TransferStatus),
}

#[derive(Debug, Clone)]
struct StoreState {
    tip: Option<BlockRef>,

    /// As read from the database, `None` if never written.
    next_mature_height: Option<u64>,

    indices: Indices,
}

pub struct CrossChainTransferStore<D, C, B, W> {
    db: Arc<D>,
    chain: Arc<C>,
    blocks: Arc<B>,
    correlator: Arc<W>,
    params: FederationParams,
    config: StoreConfig,
    state: Option<StoreState>,
}

impl<D, C, B, W> std::fmt::Debug for CrossChainTransferStore<D, C, B, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossChainTransferStore")
            .field("params", &self.params)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<D, C, B, W> CrossChainTransferStore<D, C, B, W>
where
    D: TransferDatabase,
    C: ChainView,
    B: BlockSource,
    W: WithdrawalCorrelator,
{
    pub fn new(
        db: Arc<D>,
        chain: Arc<C>,
        blocks: Arc<B>,
        correlator: Arc<W>,
        params: FederationParams,
        config: StoreConfig,
    ) -> Self {
        Self {
            db,
            chain,
            blocks,
            correlator,
            params,
            config,
            state: None,
        }
    }

    /// Loads the sync metadata and rebuilds the indices from the transfer table.
    ///
    /// Calling it again reloads everything from the database.
    pub fn initialize(&mut self) -> StoreResult<()> {
        let tip = self.db.get_tip()?;
        let next_mature_height = self.db.get_next_mature_deposit_height()?;
        let transfers = self.db.get_all_transfers()?;
        let indices = Indices::from_transfers(&transfers);

        info!(
            chain = ?self.params.tracked_chain(),
            tip = ?tip,
            next_mature_height = ?next_mature_height,
            transfers = transfers.len(),
            "initialized transfer store"
        );

        self.state = Some(StoreState {
            tip,
            next_mature_height,
            indices,
        });
        Ok(())
    }

    /// Runs the first synchronization pass.
    pub fn start(&mut self) -> StoreResult<bool> {
        self.ensure_initialized()?;
        debug!("starting initial synchronization");
        self.synchronize()
    }

    pub fn params(&self) -> &FederationParams {
        &self.params
    }

    /// Last block of the tracked chain that has been processed.
    pub fn tip(&self) -> StoreResult<Option<BlockRef>> {
        Ok(self.state()?.tip)
    }

    pub fn next_mature_deposit_height(&self) -> StoreResult<u64> {
        let state = self.state()?;
        Ok(state
            .next_mature_height
            .unwrap_or(self.config.deposit_start_height))
    }

    pub fn indices(&self) -> StoreResult<&Indices> {
        Ok(&self.state()?.indices)
    }

    pub fn transfer_ids_with_status(&self, status: TransferStatus) -> StoreResult<Vec<DepositId>> {
        Ok(self
            .state()?
            .indices
            .ids_with_status(status)
            .copied()
            .collect())
    }

    /// Fetches transfers, aligned with `deposit_ids`.
    pub fn get(&self, deposit_ids: &[DepositId]) -> StoreResult<Vec<Option<CrossChainTransfer>>> {
        self.ensure_initialized()?;

        // read in key order, then put results back in the caller's order
        let mut order: Vec<usize> = (0..deposit_ids.len()).collect();
        order.sort_by_key(|&pos| deposit_ids[pos]);
        let sorted: Vec<DepositId> = order.iter().map(|&pos| deposit_ids[pos]).collect();

        let fetched = self.db.get_transfers(&sorted)?;

        let mut transfers = vec![None; deposit_ids.len()];
        for (pos, transfer) in order.into_iter().zip(fetched) {
            transfers[pos] = transfer;
        }

        Ok(transfers)
    }

    /// Fully signed withdrawals that still have to make it into a block.
    pub fn transactions_to_broadcast(&self) -> StoreResult<Vec<Transaction>> {
        let ids = self.transfer_ids_with_status(TransferStatus::FullySigned)?;
        let transfers = self.db.get_transfers(&ids)?;

        ids.iter()
            .zip(transfers)
            .map(|(deposit_id, transfer)| {
                transfer
                    .map(|t| t.withdrawal_tx().clone())
                    .ok_or(StoreError::MissingTransfer(*deposit_id))
            })
            .collect()
    }

    /// Records the deposits that matured at the next expected counter-chain height and advances
    /// that height by one, in one commit.
    ///
    /// Deposits already tracked are left as they are, except that a transfer first seen on chain
    /// gets the deposit snapshot attached. The whole batch is refused if any transfer is not a
    /// fresh partial one for the expected height.
    pub fn record_latest_mature_deposits(
        &mut self,
        transfers: Vec<CrossChainTransfer>,
    ) -> StoreResult<()> {
        let expected = self.next_mature_deposit_height()?;

        let mut seen = HashSet::with_capacity(transfers.len());
        for transfer in &transfers {
            let deposit_id = *transfer.deposit_id();

            if transfer.status() != TransferStatus::Partial {
                return Err(StoreError::UnexpectedStatus {
                    deposit_id,
                    status: transfer.status(),
                });
            }

            let Some(got) = transfer.deposit_height() else {
                return Err(StoreError::MissingDepositInfo(deposit_id));
            };
            if got != expected {
                return Err(StoreError::DepositHeightMismatch {
                    deposit_id,
                    expected,
                    got,
                });
            }

            if !seen.insert(deposit_id) {
                return Err(StoreError::DuplicateDeposit(deposit_id));
            }
        }

        let state = self.state()?;
        let ids: Vec<DepositId> = transfers.iter().map(|t| *t.deposit_id()).collect();
        let existing = self.db.get_transfers(&ids)?;

        let mut indices = state.indices.clone();
        let mut batch = TransferWriteBatch::new();
        let mut recorded = 0;

        for (transfer, existing) in transfers.into_iter().zip(existing) {
            let deposit_id = *transfer.deposit_id();
            match existing {
                None => {
                    trace!(%deposit_id, "recording mature deposit");
                    indices.insert(&transfer);
                    batch.put_transfer(transfer);
                    recorded += 1;
                }
                Some(mut current) => {
                    let info = transfer.deposit().cloned();
                    if info.is_some_and(|info| current.attach_deposit(info)) {
                        debug!(%deposit_id, status = %current.status(), "attached deposit to transfer");
                        batch.put_transfer(current);
                    } else {
                        debug!(%deposit_id, "deposit already tracked");
                    }
                }
            }
        }

        let next = expected + 1;
        batch.set_next_mature_height(state.next_mature_height, next);
        self.db.write_batch(batch)?;

        let state = self.state_mut()?;
        state.indices = indices;
        state.next_mature_height = Some(next);

        info!(height = %expected, %recorded, "recorded mature deposits");
        Ok(())
    }

    /// Extends the tracked chain by `blocks`, which must lead from the current tip to `new_tip`.
    ///
    /// Withdrawals found in the blocks move their transfers to
    /// [`TransferStatus::SeenInBlock`], creating the transfer if the deposit is not tracked yet.
    /// Rejected transfers are left alone.
    pub fn put(&mut self, new_tip: BlockRef, blocks: &[Block]) -> StoreResult<()> {
        let tip = self.current_tip()?;

        let mut prev_hash = *tip.hash();
        let mut height = tip.height();
        for block in blocks {
            height += 1;
            if block.header.prev_blockhash != prev_hash {
                if height == tip.height() + 1 {
                    return Err(StoreError::TipMismatch {
                        expected: tip,
                        got: BlockRef::new(block.header.prev_blockhash, tip.height()),
                    });
                }
                return Err(StoreError::NonContiguousBlocks(height));
            }
            prev_hash = block.block_hash();
        }

        let reached = BlockRef::new(prev_hash, height);
        if reached != new_tip {
            return Err(StoreError::TipMismatch {
                expected: new_tip,
                got: reached,
            });
        }

        if blocks.is_empty() {
            return Ok(());
        }

        // the last sighting wins if a withdrawal shows up more than once
        let mut sightings: BTreeMap<DepositId, (Transaction, BlockRef)> = BTreeMap::new();
        for (block, height) in blocks.iter().zip(tip.height() + 1..) {
            let block_ref = BlockRef::new(block.block_hash(), height);
            for tx in &block.txdata {
                if let Some(deposit_id) = self.match_withdrawal(tx) {
                    trace!(%deposit_id, block = %block_ref, "found withdrawal");
                    sightings.insert(deposit_id, (tx.clone(), block_ref));
                }
            }
        }

        let ids: Vec<DepositId> = sightings.keys().copied().collect();
        let existing = self.db.get_transfers(&ids)?;

        let mut indices = self.state()?.indices.clone();
        let mut batch = TransferWriteBatch::new();

        for ((deposit_id, (tx, block)), existing) in sightings.into_iter().zip(existing) {
            let transfer = match existing {
                None => {
                    debug!(%deposit_id, %block, "withdrawal seen before its deposit matured");
                    let transfer = CrossChainTransfer::new_seen_in_block(deposit_id, tx.into(), block);
                    indices.insert(&transfer);
                    transfer
                }
                Some(current) if current.status() == TransferStatus::Rejected => {
                    warn!(%deposit_id, %block, "rejected withdrawal was mined, leaving it rejected");
                    continue;
                }
                Some(current) => {
                    let mut transfer = current.clone();
                    transfer.mark_seen_in_block(tx, block)?;
                    indices.update(&current, &transfer);
                    transfer
                }
            };
            batch.put_transfer(transfer);
        }

        let withdrawals = batch.transfers().len();
        batch.set_tip(new_tip);
        self.db.write_batch(batch)?;

        let state = self.state_mut()?;
        state.indices = indices;
        state.tip = Some(new_tip);

        info!(tip = %new_tip, %withdrawals, "extended tracked chain");
        Ok(())
    }

    /// Brings the tip back onto the tracked chain if it was reorganized away.
    ///
    /// Transfers seen in blocks above the common ancestor go back to
    /// [`TransferStatus::FullySigned`] and the tip is set to the ancestor.
    ///
    /// # Returns
    ///
    /// Whether the tip now equals the tip of the tracked chain.
    pub fn rewind_if_required(&mut self) -> StoreResult<bool> {
        let chain_tip = self.chain.tip();

        let Some(tip) = self.state()?.tip else {
            let genesis = self.genesis()?;
            info!(%genesis, "no tip recorded, starting from genesis");
            self.set_tip(genesis)?;
            return Ok(genesis == chain_tip);
        };

        if tip == chain_tip {
            return Ok(true);
        }

        if self.chain.height_of(tip.hash()) == Some(tip.height()) {
            // still on the best chain, just behind
            return Ok(false);
        }

        let ancestor = self.find_common_ancestor(&tip)?;
        warn!(%tip, %ancestor, "tracked chain reorganized, rewinding");

        let state = self.state()?;
        let ids = state.indices.ids_above(ancestor.height());
        let transfers = self.db.get_transfers(&ids)?;

        let mut indices = state.indices.clone();
        let mut batch = TransferWriteBatch::new();

        for (deposit_id, current) in ids.iter().zip(transfers) {
            let current = current.ok_or(StoreError::MissingTransfer(*deposit_id))?;
            let mut transfer = current.clone();
            transfer.revert_to_fully_signed()?;
            indices.update(&current, &transfer);

            debug!(%deposit_id, block = ?current.block(), "reverted withdrawal to fully signed");
            batch.put_transfer(transfer);
        }

        let reverted = batch.transfers().len();
        batch.set_tip(ancestor);
        self.db.write_batch(batch)?;

        let state = self.state_mut()?;
        state.indices = indices;
        state.tip = Some(ancestor);

        info!(tip = %ancestor, %reverted, "rewound tracked chain");
        Ok(ancestor == chain_tip)
    }

    /// Follows the tracked chain until caught up or until blocks stop being available.
    ///
    /// # Returns
    ///
    /// Whether the store is caught up with the chain.
    pub fn synchronize(&mut self) -> StoreResult<bool> {
        self.synchronize_with_cancel(|| false)
    }

    /// Like [`Self::synchronize`], but stops between batches once `is_cancelled` returns true.
    pub fn synchronize_with_cancel(&mut self, is_cancelled: impl Fn() -> bool) -> StoreResult<bool> {
        loop {
            if is_cancelled() {
                debug!("synchronization cancelled");
                return Ok(false);
            }

            if self.rewind_if_required()? {
                return Ok(true);
            }

            let tip = self.current_tip()?;
            let chain_tip = self.chain.tip();
            let last = chain_tip
                .height()
                .min(tip.height() + self.config.sync_batch_size as u64);

            let hashes: Vec<BlockHash> = (tip.height() + 1..=last)
                .map_while(|height| self.chain.block_hash_at(height))
                .collect();
            if hashes.is_empty() {
                return Ok(false);
            }

            let blocks: Vec<Block> = self
                .blocks
                .get_blocks(&hashes)
                .into_iter()
                .map_while(|block| block)
                .collect();

            let Some(last_block) = blocks.last() else {
                debug!(next = %hashes[0], "next block not available yet");
                return Ok(false);
            };

            let new_tip = BlockRef::new(last_block.block_hash(), tip.height() + blocks.len() as u64);
            self.put(new_tip, &blocks)?;

            if blocks.len() < hashes.len() {
                debug!(tip = %new_tip, "waiting for more blocks");
                return Ok(false);
            }
        }
    }

    /// Merges signatures from other federation members into a partial withdrawal.
    ///
    /// Once every input holds enough signatures the witness is assembled and the transfer
    /// becomes [`TransferStatus::FullySigned`] in the same commit.
    pub fn merge_transaction_signatures(
        &mut self,
        deposit_id: &DepositId,
        partials: &[BitcoinPsbt],
    ) -> StoreResult<MergeOutcome> {
        self.ensure_initialized()?;

        let Some(current) = self.db.get_transfer(deposit_id)? else {
            debug!(%deposit_id, "no transfer to merge signatures into");
            return Ok(MergeOutcome::NotFound);
        };

        if current.status() != TransferStatus::Partial {
            debug!(%deposit_id, status = %current.status(), "transfer is not collecting signatures");
            return Ok(MergeOutcome::NotPartial(current.status()));
        }

        let multisig = self.params.multisig();
        let mut transfer = current.clone();
        let signatures = transfer.combine_signatures(multisig, partials)?;

        let outcome = if signatures >= self.params.threshold() {
            let signed = transfer.finalize_withdrawal(multisig)?;
            transfer.mark_fully_signed(signed)?;
            info!(%deposit_id, txid = %transfer.withdrawal_txid(), "withdrawal fully signed");
            MergeOutcome::FullySigned
        } else {
            debug!(%deposit_id, %signatures, "merged signatures");
            MergeOutcome::Partial { signatures }
        };

        self.commit_transfer(&current, transfer)?;
        Ok(outcome)
    }

    /// Marks the transfer referenced by a withdrawal that will never be mined as rejected.
    ///
    /// # Returns
    ///
    /// The deposit id of the rejected transfer, or `None` if the transaction does not reference a
    /// tracked deposit.
    pub fn set_rejected_status(&mut self, tx: &Transaction) -> StoreResult<Option<DepositId>> {
        self.ensure_initialized()?;

        let Some(deposit_id) = self.correlator.try_get_deposit_reference(tx) else {
            debug!(txid = %tx.compute_txid(), "rejected transaction has no deposit reference");
            return Ok(None);
        };

        let Some(current) = self.db.get_transfer(&deposit_id)? else {
            debug!(%deposit_id, "rejected transaction references untracked deposit");
            return Ok(None);
        };

        let mut transfer = current.clone();
        transfer.mark_rejected()?;
        self.commit_transfer(&current, transfer)?;

        warn!(%deposit_id, txid = %tx.compute_txid(), "withdrawal rejected");
        Ok(Some(deposit_id))
    }

    fn commit_transfer(
        &mut self,
        current: &CrossChainTransfer,
        transfer: CrossChainTransfer,
    ) -> StoreResult<()> {
        let mut indices = self.state()?.indices.clone();
        indices.update(current, &transfer);

        let mut batch = TransferWriteBatch::new();
        batch.put_transfer(transfer);
        self.db.write_batch(batch)?;

        self.state_mut()?.indices = indices;
        Ok(())
    }

    fn set_tip(&mut self, tip: BlockRef) -> StoreResult<()> {
        let mut batch = TransferWriteBatch::new();
        batch.set_tip(tip);
        self.db.write_batch(batch)?;

        self.state_mut()?.tip = Some(tip);
        Ok(())
    }

    /// A withdrawal spends from the federation script and references a deposit.
    fn match_withdrawal(&self, tx: &Transaction) -> Option<DepositId> {
        if !self.params.multisig().is_spent_by(tx) {
            return None;
        }
        self.correlator.try_get_deposit_reference(tx)
    }

    /// Finds the last block shared by the recorded tip's branch and the best chain.
    ///
    /// Walks back from `tip` as long as the block source still serves the stale blocks. If it
    /// stops serving them the highest indexed block still on the best chain is used, and
    /// genesis if there is none.
    fn find_common_ancestor(&self, tip: &BlockRef) -> StoreResult<BlockRef> {
        let mut hash = *tip.hash();
        let mut height = tip.height();

        loop {
            if self.chain.height_of(&hash) == Some(height) {
                return Ok(BlockRef::new(hash, height));
            }
            if height == 0 {
                break;
            }

            let Some(Some(block)) = self.blocks.get_blocks(&[hash]).pop() else {
                debug!(%hash, %height, "stale block unavailable, falling back to indexed blocks");
                break;
            };
            hash = block.header.prev_blockhash;
            height -= 1;
        }

        let indexed = self
            .state()?
            .indices
            .highest_block_where(|block| self.chain.height_of(block.hash()) == Some(block.height()));
        if let Some(ancestor) = indexed {
            return Ok(ancestor);
        }

        let genesis = self.genesis()?;
        error!(%tip, %genesis, "no common ancestor found, rewinding to genesis");
        Ok(genesis)
    }

    fn genesis(&self) -> StoreResult<BlockRef> {
        let hash = self
            .chain
            .block_hash_at(0)
            .ok_or(StoreError::MissingGenesis)?;
        Ok(BlockRef::new(hash, 0))
    }

    fn current_tip(&self) -> StoreResult<BlockRef> {
        match self.state()?.tip {
            Some(tip) => Ok(tip),
            None => self.genesis(),
        }
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        self.state().map(|_| ())
    }

    fn state(&self) -> StoreResult<&StoreState> {
        self.state.as_ref().ok_or(StoreError::NotInitialized)
    }

    fn state_mut(&mut self) -> StoreResult<&mut StoreState> {
        self.state.as_mut().ok_or(StoreError::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bitcoin::{secp256k1::SecretKey, Amount, Network};
    use fedpeg_db::entities::cross_chain_transfer::TransferState;
    use fedpeg_primitives::{
        bridge::Deposit, l1::BitcoinTx, multisig::MultisigScript, params::ChainRole,
    };
    use fedpeg_rocksdb::{test_utils::get_rocksdb_tmp_instance, TransferRocksDb};
    use fedpeg_test_utils::{
        bridge::{collect_partials, create_withdrawal_psbt_for, generate_multisig, sign_psbt},
        chain::MockChain,
        ArbitraryGenerator,
    };
    use tempfile::TempDir;

    use super::*;
    use crate::correlator::OpReturnCorrelator;

    type TestStore = CrossChainTransferStore<TransferRocksDb, MockChain, MockChain, OpReturnCorrelator>;

    struct TestEnv {
        store: TestStore,
        db: Arc<TransferRocksDb>,
        chain: Arc<MockChain>,
        keys: Vec<SecretKey>,
        multisig: MultisigScript,
        arb: ArbitraryGenerator,
        _dir: TempDir,
    }

    impl TestEnv {
        fn new(deposit_start_height: u64) -> Self {
            let (rbdb, ops, dir) = get_rocksdb_tmp_instance().unwrap();
            let db = Arc::new(TransferRocksDb::new(rbdb, ops));
            let chain = Arc::new(MockChain::new());
            let (keys, multisig) = generate_multisig(2, 3);
            let params =
                FederationParams::from_multisig(multisig.clone(), Network::Regtest, ChainRole::Sidechain);
            let config = StoreConfig {
                sync_batch_size: 4,
                deposit_start_height,
            };

            let store = CrossChainTransferStore::new(
                db.clone(),
                chain.clone(),
                chain.clone(),
                Arc::new(OpReturnCorrelator),
                params,
                config,
            );

            Self {
                store,
                db,
                chain,
                keys,
                multisig,
                arb: ArbitraryGenerator::new(),
                _dir: dir,
            }
        }

        fn initialized(deposit_start_height: u64) -> Self {
            let mut env = Self::new(deposit_start_height);
            env.store.initialize().unwrap();
            env
        }

        /// A second store instance over the same database, as after a restart.
        fn restarted(&self) -> TestStore {
            let mut store = CrossChainTransferStore::new(
                self.db.clone(),
                self.chain.clone(),
                self.chain.clone(),
                Arc::new(OpReturnCorrelator),
                self.store.params().clone(),
                self.store.config,
            );
            store.initialize().unwrap();
            store
        }

        fn deposit(&self, amount: u64, target: &str) -> Deposit {
            Deposit::new(self.arb.generate(), Amount::from_sat(amount), target)
        }

        fn partial(&self, deposit: &Deposit, height: u64) -> CrossChainTransfer {
            let psbt = create_withdrawal_psbt_for(&self.multisig, deposit.id(), deposit.amount());
            CrossChainTransfer::new_partial(deposit, height, psbt)
        }

        fn psbt_of(&self, deposit_id: &DepositId) -> BitcoinPsbt {
            let transfer = self.store.get(&[*deposit_id]).unwrap().remove(0).unwrap();
            transfer.withdrawal_psbt().unwrap().clone()
        }

        /// Records a deposit at the next height and collects a quorum of signatures for it.
        fn fully_signed(&mut self, amount: u64) -> (DepositId, Transaction) {
            let height = self.store.next_mature_deposit_height().unwrap();
            let deposit = self.deposit(amount, "addr");
            let transfer = self.partial(&deposit, height);
            self.store
                .record_latest_mature_deposits(vec![transfer])
                .unwrap();

            let psbt = self.psbt_of(deposit.id());
            let partials = collect_partials(&psbt, &self.multisig, &self.keys);
            assert_eq!(
                self.store
                    .merge_transaction_signatures(deposit.id(), &partials)
                    .unwrap(),
                MergeOutcome::FullySigned
            );

            let tx = self.transfer(deposit.id()).withdrawal_tx().clone();
            (*deposit.id(), tx)
        }

        fn transfer(&self, deposit_id: &DepositId) -> CrossChainTransfer {
            self.store.get(&[*deposit_id]).unwrap().remove(0).unwrap()
        }

        /// Indices must always equal what a fresh scan of the table gives.
        fn assert_consistent(&self) {
            let transfers = self.db.get_all_transfers().unwrap();
            assert_eq!(
                self.store.indices().unwrap(),
                &Indices::from_transfers(&transfers)
            );
            for transfer in &transfers {
                if let TransferState::SeenInBlock { block, .. } = transfer.state() {
                    assert_eq!(
                        self.store.indices().unwrap().block_height(block.hash()),
                        Some(block.height())
                    );
                }
            }
        }
    }

    #[test]
    fn test_requires_initialize() {
        let mut env = TestEnv::new(0);

        assert!(matches!(env.store.tip(), Err(StoreError::NotInitialized)));
        assert!(matches!(
            env.store.get(&[DepositId::default()]),
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            env.store.record_latest_mature_deposits(vec![]),
            Err(StoreError::NotInitialized)
        ));
        assert!(matches!(
            env.store.synchronize(),
            Err(StoreError::NotInitialized)
        ));
    }

    #[test]
    fn test_record_mature_deposits_advances_height() {
        let mut env = TestEnv::initialized(10);
        assert_eq!(env.store.next_mature_deposit_height().unwrap(), 10);

        let d1 = env.deposit(500, "addr1");
        let d2 = env.deposit(700, "addr2");
        let batch = vec![env.partial(&d1, 10), env.partial(&d2, 10)];
        env.store.record_latest_mature_deposits(batch).unwrap();

        assert_eq!(env.store.next_mature_deposit_height().unwrap(), 11);
        assert_eq!(env.db.get_next_mature_deposit_height().unwrap(), Some(11));
        assert_eq!(
            env.store
                .transfer_ids_with_status(TransferStatus::Partial)
                .unwrap()
                .len(),
            2
        );

        let info = env.transfer(d1.id()).deposit().cloned().unwrap();
        assert_eq!(info.amount(), Amount::from_sat(500));
        assert_eq!(info.target_address(), "addr1");
        assert_eq!(info.height(), 10);

        // heights with no deposits still move the pointer
        env.store.record_latest_mature_deposits(vec![]).unwrap();
        assert_eq!(env.store.next_mature_deposit_height().unwrap(), 12);
        env.assert_consistent();
    }

    #[test]
    fn test_record_rejects_whole_batch() {
        let mut env = TestEnv::initialized(10);

        let good = env.deposit(500, "addr1");
        let late = env.deposit(500, "addr2");
        let batch = vec![env.partial(&good, 10), env.partial(&late, 11)];
        assert!(matches!(
            env.store.record_latest_mature_deposits(batch),
            Err(StoreError::DepositHeightMismatch {
                expected: 10,
                got: 11,
                ..
            })
        ));

        let mut rejected = env.partial(&good, 10);
        rejected.mark_rejected().unwrap();
        assert!(matches!(
            env.store.record_latest_mature_deposits(vec![rejected]),
            Err(StoreError::UnexpectedStatus {
                status: TransferStatus::Rejected,
                ..
            })
        ));

        let dup = vec![env.partial(&good, 10), env.partial(&good, 10)];
        assert!(matches!(
            env.store.record_latest_mature_deposits(dup),
            Err(StoreError::DuplicateDeposit(_))
        ));

        // nothing was applied
        assert_eq!(env.store.next_mature_deposit_height().unwrap(), 10);
        assert_eq!(env.store.get(&[*good.id()]).unwrap(), vec![None]);
        assert!(env.db.get_all_transfers().unwrap().is_empty());
    }

    #[test]
    fn test_mature_height_is_monotonic() {
        let mut env = TestEnv::initialized(0);

        for height in 0..5 {
            let deposit = env.deposit(100 + height, "addr");
            let batch = vec![env.partial(&deposit, height)];
            env.store.record_latest_mature_deposits(batch).unwrap();

            // replaying the same height is refused
            let again = env.deposit(100, "addr");
            let stale = vec![env.partial(&again, height)];
            assert!(env.store.record_latest_mature_deposits(stale).is_err());
            assert_eq!(env.store.next_mature_deposit_height().unwrap(), height + 1);
        }
    }

    #[test]
    fn test_get_keeps_caller_order() {
        let mut env = TestEnv::initialized(0);

        let deposits: Vec<Deposit> = (0..4).map(|i| env.deposit(100 + i, "addr")).collect();
        let batch = deposits.iter().map(|d| env.partial(d, 0)).collect();
        env.store.record_latest_mature_deposits(batch).unwrap();

        let unknown: DepositId = env.arb.generate();
        let ids = vec![
            *deposits[3].id(),
            unknown,
            *deposits[0].id(),
            *deposits[2].id(),
        ];
        let fetched = env.store.get(&ids).unwrap();

        assert_eq!(fetched.len(), 4);
        assert!(fetched[1].is_none());
        for (id, transfer) in ids.iter().zip(&fetched) {
            if let Some(transfer) = transfer {
                assert_eq!(transfer.deposit_id(), id);
            }
        }
    }

    #[test]
    fn test_merge_signatures() {
        let mut env = TestEnv::initialized(0);

        let deposit = env.deposit(500, "addr1");
        let batch = vec![env.partial(&deposit, 0)];
        env.store.record_latest_mature_deposits(batch).unwrap();

        let unknown: DepositId = env.arb.generate();
        assert_eq!(
            env.store.merge_transaction_signatures(&unknown, &[]).unwrap(),
            MergeOutcome::NotFound
        );

        let psbt = env.psbt_of(deposit.id());
        let first = sign_psbt(&psbt, &env.multisig, &env.keys[1]);
        assert_eq!(
            env.store
                .merge_transaction_signatures(deposit.id(), &[first])
                .unwrap(),
            MergeOutcome::Partial { signatures: 1 }
        );
        assert!(env.store.transactions_to_broadcast().unwrap().is_empty());

        let second = sign_psbt(&psbt, &env.multisig, &env.keys[2]);
        assert_eq!(
            env.store
                .merge_transaction_signatures(deposit.id(), &[second.clone()])
                .unwrap(),
            MergeOutcome::FullySigned
        );
        assert_eq!(
            env.store
                .merge_transaction_signatures(deposit.id(), &[second])
                .unwrap(),
            MergeOutcome::NotPartial(TransferStatus::FullySigned)
        );

        let to_broadcast = env.store.transactions_to_broadcast().unwrap();
        assert_eq!(to_broadcast.len(), 1);
        assert_eq!(to_broadcast[0].compute_txid(), psbt.compute_txid());
        env.assert_consistent();
    }

    #[test]
    fn test_set_rejected_status() {
        let mut env = TestEnv::initialized(0);
        env.store.synchronize().unwrap();

        let (deposit_id, tx) = env.fully_signed(500);

        let unrelated: BitcoinTx = env.arb.generate();
        assert_eq!(
            env.store.set_rejected_status(unrelated.inner()).unwrap(),
            None
        );

        assert_eq!(
            env.store.set_rejected_status(&tx).unwrap(),
            Some(deposit_id)
        );
        assert_eq!(env.transfer(&deposit_id).status(), TransferStatus::Rejected);
        assert!(env.store.transactions_to_broadcast().unwrap().is_empty());

        // a rejected withdrawal that gets mined anyway stays rejected
        let block = env.chain.mine(vec![tx]);
        assert!(env.store.synchronize().unwrap());
        assert_eq!(env.store.tip().unwrap(), Some(block));
        assert_eq!(env.transfer(&deposit_id).status(), TransferStatus::Rejected);

        let mined = env.transfer(&deposit_id).withdrawal_tx().clone();
        assert!(matches!(
            env.store.set_rejected_status(&mined),
            Err(StoreError::Entity(_))
        ));
        env.assert_consistent();
    }

    #[test]
    fn test_put_validates_blocks() {
        let mut env = TestEnv::initialized(0);
        assert!(env.store.synchronize().unwrap());
        let genesis = env.chain.genesis();
        assert_eq!(env.store.tip().unwrap(), Some(genesis));

        let b1 = env.chain.mine(vec![]);
        let b2 = env.chain.mine(vec![]);
        let block1 = env.chain.block_at(1).unwrap();
        let block2 = env.chain.block_at(2).unwrap();

        // skips block 1
        assert!(matches!(
            env.store.put(b2, &[block2.clone()]),
            Err(StoreError::TipMismatch { .. })
        ));
        // wrong order
        assert!(matches!(
            env.store.put(b2, &[block1.clone(), block1.clone()]),
            Err(StoreError::NonContiguousBlocks(2))
        ));
        // claimed tip does not match the blocks
        assert!(matches!(
            env.store.put(b2, &[block1.clone()]),
            Err(StoreError::TipMismatch { .. })
        ));
        // empty extension is a no-op
        env.store.put(genesis, &[]).unwrap();
        assert_eq!(env.store.tip().unwrap(), Some(genesis));

        env.store.put(b1, &[block1]).unwrap();
        env.store.put(b2, &[block2]).unwrap();
        assert_eq!(env.store.tip().unwrap(), Some(b2));
        assert_eq!(env.db.get_tip().unwrap(), Some(b2));
    }

    #[test]
    fn test_withdrawal_seen_before_deposit() {
        let mut env = TestEnv::initialized(5);
        env.store.synchronize().unwrap();

        // another member finished signing and broadcast before our deposit view matured
        let deposit = env.deposit(800, "addr3");
        let partial = env.partial(&deposit, 5);
        let psbt = partial.withdrawal_psbt().unwrap().clone();
        let mut signed = partial.clone();
        signed
            .combine_signatures(&env.multisig, &collect_partials(&psbt, &env.multisig, &env.keys))
            .unwrap();
        let tx = signed.finalize_withdrawal(&env.multisig).unwrap();

        let block = env.chain.mine(vec![tx]);
        assert!(env.store.synchronize().unwrap());

        let seen = env.transfer(deposit.id());
        assert_eq!(seen.status(), TransferStatus::SeenInBlock);
        assert_eq!(seen.block(), Some(&block));
        assert!(seen.deposit().is_none());

        env.store
            .record_latest_mature_deposits(vec![partial])
            .unwrap();
        let seen = env.transfer(deposit.id());
        assert_eq!(seen.status(), TransferStatus::SeenInBlock);
        assert_eq!(seen.deposit_height(), Some(5));
        assert_eq!(env.store.next_mature_deposit_height().unwrap(), 6);
        env.assert_consistent();
    }

    #[test]
    fn test_end_to_end_fork() {
        let mut env = TestEnv::initialized(10);

        let d1 = env.deposit(500, "addr1");
        let batch = vec![env.partial(&d1, 10)];
        env.store.record_latest_mature_deposits(batch).unwrap();

        // two of three members sign
        let psbt = env.psbt_of(d1.id());
        let partials = vec![
            sign_psbt(&psbt, &env.multisig, &env.keys[0]),
            sign_psbt(&psbt, &env.multisig, &env.keys[2]),
        ];
        assert_eq!(
            env.store
                .merge_transaction_signatures(d1.id(), &partials)
                .unwrap(),
            MergeOutcome::FullySigned
        );

        let signed = env.transfer(d1.id()).withdrawal_tx().clone();
        let secp = bitcoin::secp256k1::Secp256k1::verification_only();
        assert!(env
            .multisig
            .verify_input(&secp, &signed, 0, Amount::from_sat(500)));

        let b100 = env.chain.mine_to(100);
        assert!(env.store.synchronize().unwrap());
        assert_eq!(env.store.tip().unwrap(), Some(b100));

        let b101 = env.chain.mine(vec![signed]);
        assert!(env.store.synchronize().unwrap());

        let seen = env.transfer(d1.id());
        assert_eq!(seen.status(), TransferStatus::SeenInBlock);
        assert_eq!(seen.block(), Some(&b101));
        assert!(env.store.transactions_to_broadcast().unwrap().is_empty());

        env.chain.disconnect_above(100);
        assert!(env.store.rewind_if_required().unwrap());

        assert_eq!(env.transfer(d1.id()).status(), TransferStatus::FullySigned);
        assert_eq!(env.store.tip().unwrap(), Some(b100));
        assert_eq!(env.db.get_tip().unwrap(), Some(b100));
        assert_eq!(env.store.indices().unwrap().block_height(b101.hash()), None);
        assert_eq!(env.store.transactions_to_broadcast().unwrap().len(), 1);
        env.assert_consistent();
    }

    #[test]
    fn test_reorg_reverts_only_blocks_above_fork() {
        let mut env = TestEnv::initialized(0);
        env.store.synchronize().unwrap();

        let (early, early_tx) = env.fully_signed(100);
        let (late, late_tx) = env.fully_signed(200);

        env.chain.mine_to(101);
        let b102 = env.chain.mine(vec![early_tx]);
        env.chain.mine(vec![]);
        env.chain.mine(vec![late_tx.clone()]);
        env.chain.mine(vec![]);
        assert!(env.store.synchronize().unwrap());
        assert_eq!(env.store.tip().unwrap().unwrap().height(), 105);

        // fork at 102, the competing branch has not been mined yet
        env.chain.disconnect_above(102);
        assert!(env.store.rewind_if_required().unwrap());
        assert_eq!(env.store.tip().unwrap(), Some(b102));
        assert_eq!(env.transfer(&early).status(), TransferStatus::SeenInBlock);
        assert_eq!(env.transfer(&late).status(), TransferStatus::FullySigned);
        assert!(env.store.indices().unwrap().ids_above(102).is_empty());
        env.assert_consistent();

        env.chain.mine(vec![]);
        let b104 = env.chain.mine(vec![late_tx]);
        let new_tip = env.chain.mine_to(106);
        assert!(env.store.synchronize().unwrap());

        assert_eq!(env.store.tip().unwrap(), Some(new_tip));
        assert_eq!(env.transfer(&late).block(), Some(&b104));
        env.assert_consistent();
    }

    #[test]
    fn test_rewind_without_ancestor_falls_back_to_genesis() {
        let mut env = TestEnv::initialized(0);
        env.store.synchronize().unwrap();

        let (deposit_id, tx) = env.fully_signed(100);
        env.chain.mine_to(3);
        env.chain.mine(vec![tx]);
        let old_tip = env.chain.mine(vec![]);
        assert!(env.store.synchronize().unwrap());

        // the stale branch cannot be walked and the only indexed block is gone too
        env.chain.disconnect_above(2);
        env.chain.withhold(*old_tip.hash());
        env.chain.mine_to(6);

        assert!(!env.store.rewind_if_required().unwrap());
        assert_eq!(env.store.tip().unwrap(), Some(env.chain.genesis()));
        assert_eq!(env.transfer(&deposit_id).status(), TransferStatus::FullySigned);

        assert!(env.store.synchronize().unwrap());
        assert_eq!(env.store.tip().unwrap().unwrap().height(), 6);
        env.assert_consistent();
    }

    #[test]
    fn test_synchronize_stops_at_missing_block() {
        let mut env = TestEnv::initialized(0);

        let b3 = env.chain.mine_to(3);
        env.chain.mine_to(10);
        let missing = env.chain.block_at(4).unwrap().block_hash();
        env.chain.withhold(missing);

        assert!(!env.store.synchronize().unwrap());
        assert_eq!(env.store.tip().unwrap(), Some(b3));

        env.chain.release(&missing);
        assert!(env.store.synchronize().unwrap());
        assert_eq!(env.store.tip().unwrap(), Some(env.chain.tip()));
    }

    #[test]
    fn test_synchronize_honors_cancellation() {
        let mut env = TestEnv::initialized(0);
        env.chain.mine_to(20);

        assert!(!env.store.synchronize_with_cancel(|| true).unwrap());
        assert_eq!(env.store.tip().unwrap(), None);
    }

    #[test]
    fn test_restart_rebuilds_same_indices() {
        let mut env = TestEnv::initialized(0);
        env.store.synchronize().unwrap();

        let (_, tx1) = env.fully_signed(100);
        let (_, tx2) = env.fully_signed(200);
        env.fully_signed(300);
        let extra = env.deposit(50, "addr");
        let batch = vec![env.partial(&extra, 3)];
        env.store.record_latest_mature_deposits(batch).unwrap();

        env.chain.mine(vec![tx1]);
        env.chain.mine(vec![tx2]);
        env.chain.mine(vec![]);
        assert!(env.store.synchronize().unwrap());
        env.chain.disconnect_above(1);
        env.store.rewind_if_required().unwrap();

        let restarted = env.restarted();
        assert_eq!(restarted.indices().unwrap(), env.store.indices().unwrap());
        assert_eq!(restarted.tip().unwrap(), env.store.tip().unwrap());
        assert_eq!(
            restarted.next_mature_deposit_height().unwrap(),
            env.store.next_mature_deposit_height().unwrap()
        );
        env.assert_consistent();
    }
}

//! An in-memory chain of blocks that can be extended and reorganized from tests.

use std::collections::{HashMap, HashSet};

use bitcoin::{
    absolute::LockTime,
    block::{Header, Version as BlockVersion},
    hashes::Hash,
    transaction::Version,
    Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxMerkleNode, TxOut, Witness,
};
use fedpeg_db::traits::{BlockSource, ChainView};
use fedpeg_primitives::l1::BlockRef;
use parking_lot::RwLock;

/// Builds a block on top of `prev_blockhash`. A random nonce keeps sibling blocks distinct.
pub fn build_block(prev_blockhash: BlockHash, height: u64, txs: Vec<Transaction>) -> Block {
    let coinbase = Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::builder().push_int(height as i64).into_script(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(50),
            script_pubkey: ScriptBuf::new(),
        }],
    };

    let mut txdata = vec![coinbase];
    txdata.extend(txs);

    let mut block = Block {
        header: Header {
            version: BlockVersion::TWO,
            prev_blockhash,
            merkle_root: TxMerkleNode::all_zeros(),
            time: height as u32,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: rand::random(),
        },
        txdata,
    };
    if let Some(root) = block.compute_merkle_root() {
        block.header.merkle_root = root;
    }

    block
}

#[derive(Debug)]
struct ChainState {
    /// Best chain, indexed by height.
    best: Vec<BlockHash>,

    /// Every block ever mined, including the ones reorganized away.
    blocks: HashMap<BlockHash, Block>,

    /// Blocks that [`BlockSource::get_blocks`] pretends not to have yet.
    withheld: HashSet<BlockHash>,
}

/// A chain that starts at a genesis block and is driven entirely by the test.
#[derive(Debug)]
pub struct MockChain {
    state: RwLock<ChainState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        let genesis = build_block(BlockHash::all_zeros(), 0, vec![]);
        let hash = genesis.block_hash();

        Self {
            state: RwLock::new(ChainState {
                best: vec![hash],
                blocks: HashMap::from([(hash, genesis)]),
                withheld: HashSet::new(),
            }),
        }
    }

    pub fn genesis(&self) -> BlockRef {
        BlockRef::new(self.state.read().best[0], 0)
    }

    /// Mines a block with `txs` on top of the current tip.
    pub fn mine(&self, txs: Vec<Transaction>) -> BlockRef {
        let mut state = self.state.write();
        let height = state.best.len() as u64;
        let prev = *state.best.last().expect("genesis is always present");

        let block = build_block(prev, height, txs);
        let hash = block.block_hash();
        state.best.push(hash);
        state.blocks.insert(hash, block);

        BlockRef::new(hash, height)
    }

    /// Mines empty blocks until the tip is at `height`.
    pub fn mine_to(&self, height: u64) -> BlockRef {
        let mut tip = self.tip();
        while tip.height() < height {
            tip = self.mine(vec![]);
        }
        tip
    }

    /// Drops every block above `height` from the best chain. The blocks stay retrievable by hash.
    pub fn disconnect_above(&self, height: u64) -> BlockRef {
        let mut state = self.state.write();
        state.best.truncate(height as usize + 1);
        let tip = *state.best.last().expect("genesis is always present");
        BlockRef::new(tip, state.best.len() as u64 - 1)
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        let state = self.state.read();
        let hash = state.best.get(height as usize)?;
        state.blocks.get(hash).cloned()
    }

    pub fn withhold(&self, hash: BlockHash) {
        self.state.write().withheld.insert(hash);
    }

    pub fn release(&self, hash: &BlockHash) {
        self.state.write().withheld.remove(hash);
    }
}

impl ChainView for MockChain {
    fn tip(&self) -> BlockRef {
        let state = self.state.read();
        let hash = *state.best.last().expect("genesis is always present");
        BlockRef::new(hash, state.best.len() as u64 - 1)
    }

    fn block_hash_at(&self, height: u64) -> Option<BlockHash> {
        self.state.read().best.get(height as usize).copied()
    }

    fn height_of(&self, hash: &BlockHash) -> Option<u64> {
        self.state
            .read()
            .best
            .iter()
            .rposition(|h| h == hash)
            .map(|pos| pos as u64)
    }
}

impl BlockSource for MockChain {
    fn get_blocks(&self, hashes: &[BlockHash]) -> Vec<Option<Block>> {
        let state = self.state.read();
        hashes
            .iter()
            .map(|hash| {
                if state.withheld.contains(hash) {
                    return None;
                }
                state.blocks.get(hash).cloned()
            })
            .collect()
    }
}

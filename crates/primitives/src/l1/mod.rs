//! Chain-level types that are stored alongside bridge state.

mod block;
mod btc;

pub use block::BlockRef;
pub use btc::{BitcoinPsbt, BitcoinTx};

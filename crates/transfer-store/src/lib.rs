//! Reorg-aware ledger of cross-chain transfers.
//!
//! [`CrossChainTransferStore`] tracks every deposit from the moment it matures on the
//! counter-chain until its withdrawal is buried in the tracked chain, and unwinds that progress
//! when the tracked chain reorganizes. [`TransferStoreHandle`] serializes access to it from async
//! code and [`sync_task`] keeps it following the chain.

pub mod correlator;
pub mod deposits;
pub mod errors;
mod exec;
pub mod handle;
pub mod indices;
pub mod store;
pub mod task;
mod utils;

pub use correlator::OpReturnCorrelator;
pub use deposits::MultisigDepositExtractor;
pub use errors::{StoreError, StoreResult};
pub use handle::TransferStoreHandle;
pub use indices::Indices;
pub use store::{CrossChainTransferStore, MergeOutcome, StoreConfig};
pub use task::sync_task;

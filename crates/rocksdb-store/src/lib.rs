pub mod macros;
pub mod transfer;
pub mod utils;

#[cfg(feature = "test_utils")]
pub mod test_utils;

pub const ROCKSDB_NAME: &str = "fedpeg";

pub const STORE_COLUMN_FAMILIES: &[ColumnFamilyName] = &[
    TransferSchema::COLUMN_FAMILY_NAME,
    SyncTipSchema::COLUMN_FAMILY_NAME,
    NextMatureHeightSchema::COLUMN_FAMILY_NAME,
];

// Re-exports
use rockbound::{schema::ColumnFamilyName, Schema};
pub use transfer::db::TransferRocksDb;
use transfer::schemas::{NextMatureHeightSchema, SyncTipSchema, TransferSchema};
pub use utils::{open_existing_rocksdb_database, open_rocksdb_database};

/// database operations configuration
#[derive(Clone, Copy, Debug)]
pub struct DbOpsConfig {
    pub retry_count: u16,
}

impl DbOpsConfig {
    pub fn new(retry_count: u16) -> Self {
        Self { retry_count }
    }
}

use std::{fs, path::Path, sync::Arc};

use anyhow::{bail, Context};
use rockbound::{rocksdb, OptimisticTransactionDB as DB};

use crate::{ROCKSDB_NAME, STORE_COLUMN_FAMILIES};

/// Opens the transfer store database under `datadir`, creating it if missing.
pub fn open_rocksdb_database(datadir: &Path) -> anyhow::Result<Arc<DB>> {
    let database_dir = datadir.join("rocksdb");

    if !database_dir.exists() {
        fs::create_dir_all(&database_dir)?;
    }

    let mut opts = rocksdb::Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    let rbdb = DB::open(
        &database_dir,
        ROCKSDB_NAME,
        STORE_COLUMN_FAMILIES.iter().map(|s| s.to_string()),
        &opts,
    )
    .context("opening database")?;

    Ok(Arc::new(rbdb))
}

/// Opens the transfer store database under `datadir` without creating the database or any of its
/// column families.
///
/// Fails if no store exists there yet, or if another process holds the database lock.
pub fn open_existing_rocksdb_database(datadir: &Path) -> anyhow::Result<Arc<DB>> {
    let database_dir = datadir.join("rocksdb");

    if !database_dir.exists() {
        bail!("no transfer store under {}", datadir.display());
    }

    let mut opts = rocksdb::Options::default();
    opts.create_if_missing(false);
    opts.create_missing_column_families(false);

    let rbdb = DB::open(
        &database_dir,
        ROCKSDB_NAME,
        STORE_COLUMN_FAMILIES.iter().map(|s| s.to_string()),
        &opts,
    )
    .context("opening existing database")?;

    Ok(Arc::new(rbdb))
}

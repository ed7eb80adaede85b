use std::path::Path;

use anyhow::Context;
use fedpeg_config::Config;
use fedpeg_db::{entities::cross_chain_transfer::TransferStatus, traits::TransferDatabase};
use fedpeg_rocksdb::{open_existing_rocksdb_database, DbOpsConfig, TransferRocksDb};
use fedpeg_transfer_store::Indices;
use tracing::*;

/// Opens an existing store without creating anything. The node using it must be stopped, since
/// RocksDB allows one process at a time.
pub fn open_existing(datadir: &Path, retry_count: u16) -> anyhow::Result<TransferRocksDb> {
    debug!(datadir = %datadir.display(), "opening transfer store");
    let rbdb = open_existing_rocksdb_database(datadir).context("opening transfer store")?;
    Ok(TransferRocksDb::new(rbdb, DbOpsConfig::new(retry_count)))
}

pub fn summary(db: &impl TransferDatabase) -> anyhow::Result<()> {
    let tip = db.get_tip()?;
    let next_mature = db.get_next_mature_deposit_height()?;
    let transfers = db.get_all_transfers()?;
    let indices = Indices::from_transfers(&transfers);

    match tip {
        Some(tip) => println!("tip: {tip}"),
        None => println!("tip: (unset)"),
    }
    match next_mature {
        Some(height) => println!("next mature deposit height: {height}"),
        None => println!("next mature deposit height: (unset)"),
    }

    println!("transfers: {}", transfers.len());
    for status in TransferStatus::ALL {
        println!("  {status}: {}", indices.count(status));
    }

    Ok(())
}

pub fn list(db: &impl TransferDatabase, status: TransferStatus) -> anyhow::Result<()> {
    let transfers = db.get_all_transfers()?;

    for transfer in transfers.iter().filter(|t| t.status() == status) {
        let height = transfer
            .deposit_height()
            .map_or_else(|| "-".to_owned(), |h| h.to_string());
        match transfer.block() {
            Some(block) => println!(
                "{} deposit_height={height} txid={} block={block}",
                transfer.deposit_id(),
                transfer.withdrawal_txid()
            ),
            None => println!(
                "{} deposit_height={height} txid={}",
                transfer.deposit_id(),
                transfer.withdrawal_txid()
            ),
        }
    }

    Ok(())
}

/// Settings a node started with `config` would run the store with.
pub fn settings(config: &Config) -> anyhow::Result<()> {
    for line in settings_lines(config)? {
        println!("{line}");
    }

    Ok(())
}

fn settings_lines(config: &Config) -> anyhow::Result<Vec<String>> {
    let params = config
        .federation_params()
        .context("invalid federation config")?;
    let store_config = config.store_config();
    let multisig = params.multisig();

    Ok(vec![
        format!("datadir: {}", config.client.datadir.display()),
        format!(
            "federation: {}-of-{} {}",
            multisig.threshold(),
            multisig.pubkeys().len(),
            multisig.address(params.network())
        ),
        format!(
            "tracked chain: {:?}, deposits from: {:?}",
            params.tracked_chain(),
            params.tracked_chain().counter_chain()
        ),
        format!("deposit start height: {}", store_config.deposit_start_height),
        format!("sync batch size: {}", store_config.sync_batch_size),
        format!("poll interval: {:?}", config.poll_interval()),
    ])
}

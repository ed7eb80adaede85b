use std::path::PathBuf;

use argh::FromArgs;
use fedpeg_common::logging;
use fedpeg_config::Config;
use fedpeg_db::entities::cross_chain_transfer::TransferStatus;

mod inspect;

/// Args.
#[derive(FromArgs)]
pub struct Args {
    #[argh(option, description = "datadir of the transfer store")]
    datadir: Option<PathBuf>,
    #[argh(option, description = "node config, used for datadir and retry count")]
    config: Option<PathBuf>,
    #[argh(subcommand)]
    subc: Subcommand,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
pub enum Subcommand {
    Summary(SubcSummary),
    List(SubcList),
    Settings(SubcSettings),
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "summary",
    description = "print tip, mature deposit height and transfer counts"
)]
pub struct SubcSummary {}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "list", description = "list transfers with a status")]
pub struct SubcList {
    #[argh(
        option,
        description = "partial, fully_signed, seen_in_block or rejected"
    )]
    status: TransferStatus,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "settings",
    description = "print the federation and sync settings from --config"
)]
pub struct SubcSettings {}

fn main() {
    logging::init(logging::LoggerConfig::with_base_name("fedpeg-dbtool"));

    let args: Args = argh::from_env();
    if let Err(e) = main_inner(args) {
        eprintln!("{e}\n{e:?}");
    }

    logging::finalize();
}

fn main_inner(args: Args) -> anyhow::Result<()> {
    let config = args.config.as_deref().map(Config::load).transpose()?;

    match args.subc {
        Subcommand::Summary(_) => inspect::summary(&open_store(args.datadir, config.as_ref())?)?,
        Subcommand::List(subc) => {
            inspect::list(&open_store(args.datadir, config.as_ref())?, subc.status)?
        }
        Subcommand::Settings(_) => match &config {
            Some(config) => inspect::settings(config)?,
            None => anyhow::bail!("settings requires --config"),
        },
    };

    Ok(())
}

fn open_store(
    datadir: Option<PathBuf>,
    config: Option<&Config>,
) -> anyhow::Result<fedpeg_rocksdb::TransferRocksDb> {
    let datadir = match (datadir, config) {
        (Some(datadir), _) => datadir,
        (None, Some(config)) => config.client.datadir.clone(),
        (None, None) => anyhow::bail!("either --datadir or --config is required"),
    };
    let retry_count = config.map_or(1, |c| c.db.retry_count);

    inspect::open_existing(&datadir, retry_count)
}

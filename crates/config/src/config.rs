use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use bitcoin::{Network, ScriptBuf};
use fedpeg_primitives::params::{ChainRole, FederationParams};
use fedpeg_transfer_store::{store::DEFAULT_SYNC_BATCH_SIZE, StoreConfig};
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default value for `datadir` in [`ClientConfig`].
const DEFAULT_DATADIR: &str = "fedpeg-data";

/// Default value for `retry_count` in [`DbConfig`].
const DEFAULT_DB_RETRY_COUNT: u16 = 5;

/// Default value for `poll_interval_ms` in [`SyncConfig`].
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The data directory where database contents reside.
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            datadir: default_datadir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// For optimistic transactions, how many times to retry if a write fails.
    #[serde(default = "default_db_retry_count")]
    pub retry_count: u16,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_DB_RETRY_COUNT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How many blocks of the tracked chain to ingest at once.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How often the sync task polls the tracked chain.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationConfig {
    /// Hex encoded `m-of-n` `OP_CHECKMULTISIG` redeem script.
    pub redeem_script: String,

    /// Must match the `m` of the redeem script.
    pub threshold: usize,

    pub network: Network,

    /// The chain whose withdrawals this node follows.
    pub tracked_chain: ChainRole,

    /// Counter-chain height of the first batch of mature deposits.
    #[serde(default)]
    pub deposit_start_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub federation: FederationConfig,
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses the redeem script and checks it against the configured threshold.
    pub fn federation_params(&self) -> Result<FederationParams, ConfigError> {
        let fed = &self.federation;
        let redeem_script = ScriptBuf::from_bytes(hex::decode(&fed.redeem_script).map_err(
            fedpeg_primitives::errors::ParseError::from,
        )?);

        Ok(FederationParams::new(
            redeem_script,
            fed.threshold,
            fed.network,
            fed.tracked_chain,
        )?)
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            sync_batch_size: self.sync.batch_size,
            deposit_start_height: self.federation.deposit_start_height,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync.poll_interval_ms)
    }
}

fn default_datadir() -> PathBuf {
    DEFAULT_DATADIR.into()
}

fn default_db_retry_count() -> u16 {
    DEFAULT_DB_RETRY_COUNT
}

fn default_batch_size() -> usize {
    DEFAULT_SYNC_BATCH_SIZE
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

#[cfg(test)]
mod test {
    use fedpeg_primitives::errors::ParseError;
    use fedpeg_test_utils::bridge::generate_multisig;

    use super::*;

    fn federation_toml(redeem_script: &str, threshold: usize) -> String {
        format!(
            r#"
            [federation]
            redeem_script = "{redeem_script}"
            threshold = {threshold}
            network = "regtest"
            tracked_chain = "sidechain"
            "#
        )
    }

    #[test]
    fn test_config_load() {
        let (_, multisig) = generate_multisig(2, 3);
        let redeem_script = hex::encode(multisig.redeem_script().as_bytes());

        let config_string = format!(
            r#"
            [client]
            datadir = "/path/to/data/directory"

            [db]
            retry_count = 3

            [sync]
            batch_size = 50
            poll_interval_ms = 200
            {}
            deposit_start_height = 120
            "#,
            federation_toml(&redeem_script, 2)
        );

        let config = Config::from_toml_str(&config_string);
        assert!(
            config.is_ok(),
            "should be able to load TOML config but got: {:?}",
            config.err()
        );
        let config = config.unwrap();

        assert_eq!(config.db.retry_count, 3);
        assert_eq!(config.poll_interval(), Duration::from_millis(200));

        let store_config = config.store_config();
        assert_eq!(store_config.sync_batch_size, 50);
        assert_eq!(store_config.deposit_start_height, 120);

        let params = config.federation_params().unwrap();
        assert_eq!(params.multisig(), &multisig);
        assert_eq!(params.network(), Network::Regtest);
        assert_eq!(params.tracked_chain(), ChainRole::Sidechain);
    }

    #[test]
    fn test_defaults() {
        let (_, multisig) = generate_multisig(1, 1);
        let redeem_script = hex::encode(multisig.redeem_script().as_bytes());

        let config = Config::from_toml_str(&federation_toml(&redeem_script, 1)).unwrap();
        assert_eq!(config.client.datadir, PathBuf::from(DEFAULT_DATADIR));
        assert_eq!(config.db.retry_count, DEFAULT_DB_RETRY_COUNT);
        assert_eq!(config.sync.batch_size, DEFAULT_SYNC_BATCH_SIZE);
        assert_eq!(config.federation.deposit_start_height, 0);
    }

    #[test]
    fn test_invalid_federation() {
        let (_, multisig) = generate_multisig(2, 3);
        let redeem_script = hex::encode(multisig.redeem_script().as_bytes());

        let config = Config::from_toml_str(&federation_toml(&redeem_script, 3)).unwrap();
        assert!(matches!(
            config.federation_params(),
            Err(ConfigError::Federation(ParseError::ThresholdMismatch {
                configured: 3,
                script: 2
            }))
        ));

        let config = Config::from_toml_str(&federation_toml("zz", 1)).unwrap();
        assert!(matches!(
            config.federation_params(),
            Err(ConfigError::Federation(ParseError::InvalidHex(_)))
        ));

        assert!(Config::from_toml_str("[client]\n").is_err());
    }
}

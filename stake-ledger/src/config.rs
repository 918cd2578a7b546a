//! Configuration for the stake ledger node

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Platform stake denomination
pub const STAKE_DENOM: &str = "trusteak";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Staking parameters handed to the keeper
    pub staking: StakingParams,

    /// End-of-block driver configuration
    pub driver: DriverConfig,

    /// Genesis file imported into an empty store
    pub genesis_path: Option<PathBuf>,

    /// Claims accepted by the node's claim registry
    pub known_claims: Vec<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/stake-ledger"),
            service_name: "stake-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            staking: StakingParams::default(),
            driver: DriverConfig::default(),
            genesis_path: None,
            known_claims: Vec::new(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Level 0 file num compaction trigger
    pub level0_file_num_compaction_trigger: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// fsync every committed batch
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            target_file_size_mb: 64,
            max_background_jobs: 4,
            level0_file_num_compaction_trigger: 4,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

impl RocksDBConfig {
    /// Small buffers, no fsync
    pub fn for_testing() -> Self {
        Self {
            write_buffer_size_mb: 4,
            max_write_buffer_number: 2,
            target_file_size_mb: 4,
            max_background_jobs: 2,
            level0_file_num_compaction_trigger: 4,
            enable_statistics: false,
            sync_writes: false,
        }
    }
}

/// Staking parameters, immutable for the lifetime of a keeper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakingParams {
    /// Denomination every stake must use
    pub stake_denom: String,

    /// Smallest accepted stake amount
    pub min_stake_amount: u64,

    /// Largest accepted stake amount
    pub max_stake_amount: u64,

    /// Stake duration when the caller does not supply one (seconds)
    pub default_stake_duration_secs: u64,

    /// Minimum argument body length (characters)
    pub min_argument_length: usize,

    /// Maximum argument body length (characters)
    pub max_argument_length: usize,

    /// Matured stakes processed per end-of-block drain
    pub drain_page_size: usize,
}

impl Default for StakingParams {
    fn default() -> Self {
        Self {
            stake_denom: STAKE_DENOM.to_string(),
            min_stake_amount: 1,
            max_stake_amount: 1_000_000_000_000_000,
            default_stake_duration_secs: 7 * 24 * 60 * 60, // 7 days
            min_argument_length: 25,
            max_argument_length: 3000,
            drain_page_size: 100,
        }
    }
}

impl StakingParams {
    /// Default stake duration
    pub fn default_stake_duration(&self) -> Duration {
        Duration::seconds(self.default_stake_duration_secs as i64)
    }

    /// Check internal consistency
    pub fn validate(&self) -> crate::Result<()> {
        if self.stake_denom.is_empty() {
            return Err(crate::Error::Config("stake_denom must not be empty".into()));
        }
        if self.min_stake_amount == 0 || self.min_stake_amount > self.max_stake_amount {
            return Err(crate::Error::Config(format!(
                "invalid stake bounds [{}, {}]",
                self.min_stake_amount, self.max_stake_amount
            )));
        }
        if self.default_stake_duration_secs == 0
            || self.default_stake_duration_secs > i64::MAX as u64 / 1_000_000_000
        {
            return Err(crate::Error::Config(format!(
                "invalid default stake duration {}s",
                self.default_stake_duration_secs
            )));
        }
        if self.min_argument_length > self.max_argument_length {
            return Err(crate::Error::Config(format!(
                "invalid argument length bounds [{}, {}]",
                self.min_argument_length, self.max_argument_length
            )));
        }
        if self.drain_page_size == 0 {
            return Err(crate::Error::Config("drain_page_size must be positive".into()));
        }
        Ok(())
    }
}

/// End-of-block driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Interval between end-of-block ticks (milliseconds)
    pub block_interval_ms: u64,

    /// Keeper actor mailbox capacity
    pub mailbox_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            block_interval_ms: 5_000,
            mailbox_capacity: 1000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("STAKE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(denom) = std::env::var("STAKE_DENOM") {
            config.staking.stake_denom = denom;
        }

        if let Ok(interval) = std::env::var("STAKE_BLOCK_INTERVAL_MS") {
            config.driver.block_interval_ms = interval.parse().map_err(|e| {
                crate::Error::Config(format!("STAKE_BLOCK_INTERVAL_MS: {}", e))
            })?;
        }

        if let Ok(path) = std::env::var("STAKE_GENESIS_PATH") {
            config.genesis_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the whole configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.staking.validate()?;
        if self.driver.block_interval_ms == 0 || self.driver.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "driver interval and mailbox capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "stake-ledger");
        assert_eq!(config.staking.stake_denom, STAKE_DENOM);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_stake_bounds() {
        let params = StakingParams {
            min_stake_amount: 10,
            max_stake_amount: 5,
            ..StakingParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/tmp/stakes"
            known_claims = [1, 2, 3]

            [staking]
            drain_page_size = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.staking.drain_page_size, 10);
        assert_eq!(config.staking.stake_denom, STAKE_DENOM);
        assert_eq!(config.known_claims, vec![1, 2, 3]);
    }
}

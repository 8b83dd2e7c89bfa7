//! Configuration loading and resolution
//!
//! Configuration file resolution order:
//! 1. Command-line argument (highest priority)
//! 2. `MPI_CONFIG` environment variable
//! 3. `<os config dir>/mpi/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing configuration file is not an error; compiled defaults apply.
//! Selected fields can then be overridden individually from the environment.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "MPI_CONFIG";

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Folder holding the SQLite database
    pub root_folder: PathBuf,
    /// Database file name inside `root_folder`
    pub database_file: String,
    pub http: HttpConfig,
    pub chain: ChainConfig,
    pub ingest: IngestLimits,
    pub db: DbConfig,
    pub tail: TailConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
}

/// Chain RPC settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Payment router contract emitting `PaymentProcessed`
    pub contract_address: String,
    pub request_timeout_ms: u64,
    /// Block window per `eth_getLogs` page
    pub log_page_blocks: u64,
    /// Blocks behind head considered final by the tailer
    pub confirmations: u64,
}

/// Bounds on administrative operations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestLimits {
    pub max_replay_blocks: u64,
    pub song_parallelism: usize,
    pub poison_list_max: u32,
    pub retry_batch_max: u32,
    pub retry_batch_default: u32,
    /// Decimal places of the payment token's smallest unit
    pub token_decimals: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub busy_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    pub max_connections: u32,
}

/// Live tailing of the chain head
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    pub enabled: bool,
    pub start_block: u64,
    pub poll_interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root_folder: default_root_folder(),
            database_file: "mpi.db".to_string(),
            http: HttpConfig::default(),
            chain: ChainConfig::default(),
            ingest: IngestLimits::default(),
            db: DbConfig::default(),
            tail: TailConfig::default(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5780".to_string(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: "0x0000000000000000000000000000000000000000".to_string(),
            request_timeout_ms: 10_000,
            log_page_blocks: 1_000,
            confirmations: 3,
        }
    }
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_replay_blocks: 100_000,
            song_parallelism: 4,
            poison_list_max: 500,
            retry_batch_max: 200,
            retry_batch_default: 50,
            token_decimals: 18,
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            acquire_timeout_ms: 5_000,
            max_connections: 8,
        }
    }
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_block: 0,
            poll_interval_secs: 12,
        }
    }
}

impl IngestConfig {
    /// Resolve, load, apply environment overrides and validate
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            None => {
                warn!("No configuration file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Apply per-field environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("MPI_RPC_URL") {
            self.chain.rpc_url = url;
        }
        if let Ok(address) = std::env::var("MPI_CONTRACT_ADDRESS") {
            self.chain.contract_address = address;
        }
        if let Ok(folder) = std::env::var("MPI_ROOT_FOLDER") {
            self.root_folder = PathBuf::from(folder);
        }
        if let Ok(bind) = std::env::var("MPI_BIND") {
            self.http.bind = bind;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain.log_page_blocks == 0 {
            return Err(Error::Config("chain.log_page_blocks must be > 0".into()));
        }
        if self.chain.request_timeout_ms == 0 {
            return Err(Error::Config("chain.request_timeout_ms must be > 0".into()));
        }
        if self.ingest.max_replay_blocks == 0 {
            return Err(Error::Config("ingest.max_replay_blocks must be > 0".into()));
        }
        if self.ingest.song_parallelism == 0 {
            return Err(Error::Config("ingest.song_parallelism must be > 0".into()));
        }
        if self.ingest.poison_list_max == 0 || self.ingest.retry_batch_max == 0 {
            return Err(Error::Config("poison list/retry limits must be > 0".into()));
        }
        if self.ingest.retry_batch_default == 0
            || self.ingest.retry_batch_default > self.ingest.retry_batch_max
        {
            return Err(Error::Config(
                "ingest.retry_batch_default must be within 1..=retry_batch_max".into(),
            ));
        }
        if self.ingest.token_decimals > 28 {
            return Err(Error::Config("ingest.token_decimals must be <= 28".into()));
        }
        if !is_hex_address(&self.chain.contract_address) {
            return Err(Error::Config(format!(
                "chain.contract_address is not a 20-byte hex address: {}",
                self.chain.contract_address
            )));
        }
        Ok(())
    }

    /// Full path of the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(&self.database_file)
    }
}

fn is_hex_address(value: &str) -> bool {
    let hex = value.strip_prefix("0x").unwrap_or(value);
    hex.len() == 40 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Pick the configuration file to load, if any
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    dirs::config_dir()
        .map(|d| d.join("mpi").join("config.toml"))
        .filter(|p| p.exists())
}

/// OS-dependent default folder for the database
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mpi"))
        .unwrap_or_else(|| PathBuf::from("./mpi_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chain.log_page_blocks, 1_000);
        assert_eq!(config.database_path().file_name().unwrap(), "mpi.db");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = IngestConfig::from_toml_str(
            r#"
            root_folder = "/tmp/mpi"

            [chain]
            rpc_url = "http://node:8545"
            contract_address = "0x1111111111111111111111111111111111111111"

            [tail]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder, PathBuf::from("/tmp/mpi"));
        assert_eq!(config.chain.rpc_url, "http://node:8545");
        assert_eq!(config.chain.confirmations, 3);
        assert!(config.tail.enabled);
        assert_eq!(config.tail.poll_interval_secs, 12);
        assert_eq!(config.ingest.retry_batch_default, 50);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = IngestConfig::default();
        config.chain.contract_address = "0x1234".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = IngestConfig::default();
        config.ingest.retry_batch_default = 500;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.chain.log_page_blocks = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = IngestConfig::from_toml_str("[chain\nrpc_url = 1");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

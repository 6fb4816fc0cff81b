//! Configuration management for HelixChain

use crate::error::ChainError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub mempool: MempoolConfig,
    #[serde(default)]
    pub genesis: GenesisConfig,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Keep everything in memory instead of SQLite, for throwaway nodes.
    #[serde(default)]
    pub in_memory: bool,
}

#[derive(Debug, Deserialize)]
pub struct MempoolConfig {
    #[serde(default = "default_mempool_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub min_fee_per_byte: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct GenesisConfig {
    /// Pre-funded balances, as (hex address, amount) pairs.
    #[serde(default)]
    pub balances: Vec<GenesisBalance>,
}

#[derive(Debug, Deserialize)]
pub struct GenesisBalance {
    pub address: String,
    pub balance: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            in_memory: false,
        }
    }
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_mempool_capacity(),
            min_fee_per_byte: 0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            mempool: MempoolConfig::default(),
            genesis: GenesisConfig::default(),
        }
    }
}

fn default_db_path() -> String {
    "helixchain.db".to_string()
}

fn default_mempool_capacity() -> usize {
    crate::mempool::DEFAULT_CAPACITY
}

/// Load configuration from `config.toml` in the working directory, falling
/// back to defaults when the file is absent.
pub fn load_config() -> Result<Config, ChainError> {
    load_config_from("config.toml")
}

pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<Config, ChainError> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str)
            .map_err(|e| ChainError::Malformed(format!("invalid config: {}", e)))?
    };

    if !config.database.in_memory && config.database.path.is_empty() {
        return Err(ChainError::Malformed(
            "database.path must be set when not running in memory".to_string(),
        ));
    }

    Ok(config)
}

impl Config {
    /// Genesis balances with addresses decoded from hex.
    pub fn genesis_balances(&self) -> Result<Vec<(crate::crypto::Address, u64)>, ChainError> {
        self.genesis
            .balances
            .iter()
            .map(|entry| {
                crate::crypto::address_from_hex(&entry.address)
                    .map(|address| (address, entry.balance))
            })
            .collect()
    }
}

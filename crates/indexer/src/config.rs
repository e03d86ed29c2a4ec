//! Configuration for the indexer.
//!
//! Loaded from a TOML file with `${VAR}` environment-variable expansion;
//! every field has a serde default so a minimal file (or none at all) is
//! enough to start against local defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Overlay network settings.
    #[serde(default)]
    pub overlay: OverlayConfig,

    /// Metadata database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Content store settings.
    #[serde(default)]
    pub content_store: ContentStoreConfig,

    /// HTTP fetcher settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Term cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Chain lifecycle settings.
    #[serde(default)]
    pub chain: ChainConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Overlay network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Network name used in topic composition (e.g. "mainnet",
    /// "teratestnet").
    #[serde(default = "default_network")]
    pub network: String,

    /// P2P listen port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Bootstrap peer multiaddrs.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            listen_port: default_listen_port(),
            bootstrap_peers: Vec::new(),
        }
    }
}

/// Metadata database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pool connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum pool connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

/// Content store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentStoreConfig {
    /// Backend: "sled" (durable) or "memory" (tests).
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Data directory for the durable backend.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for ContentStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: default_store_path(),
        }
    }
}

/// HTTP fetcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Timeout for subtree txid discovery, seconds.
    #[serde(default = "default_discovery_timeout_secs")]
    pub discovery_timeout_secs: u64,

    /// Timeout for transaction body transfers, seconds.
    #[serde(default = "default_bulk_timeout_secs")]
    pub bulk_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: default_discovery_timeout_secs(),
            bulk_timeout_secs: default_bulk_timeout_secs(),
        }
    }
}

/// Term cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of transactions whose terms are cached.
    #[serde(default = "default_term_cache_size")]
    pub term_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            term_cache_size: default_term_cache_size(),
        }
    }
}

/// Chain lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Blocks below the tip after which orphans are deleted.
    #[serde(default = "default_finality_depth")]
    pub finality_depth: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            finality_depth: default_finality_depth(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_network() -> String {
    "mainnet".to_string()
}

fn default_listen_port() -> u16 {
    9905
}

fn default_database_url() -> String {
    "sqlite://teraindex.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_store_backend() -> String {
    "sled".to_string()
}

fn default_store_path() -> String {
    "./data/content".to_string()
}

fn default_discovery_timeout_secs() -> u64 {
    30
}

fn default_bulk_timeout_secs() -> u64 {
    60
}

fn default_term_cache_size() -> usize {
    100_000
}

fn default_finality_depth() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file, expanding `${VAR}` environment
    /// placeholders first.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        let expanded = Self::expand_env_vars(&contents)?;
        Self::from_toml_str(&expanded)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        toml::from_str(toml).context("Failed to parse TOML configuration")
    }

    /// Replace every `${VAR_NAME}` placeholder with the value of that
    /// environment variable; an unset variable is an error.
    fn expand_env_vars(input: &str) -> Result<String> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .with_context(|| format!("Unclosed environment placeholder at {start}"))?;
            let name = &after[..end];
            anyhow::ensure!(!name.is_empty(), "Empty environment variable name");

            let value = std::env::var(name)
                .with_context(|| format!("Environment variable {name} is not set"))?;
            output.push_str(&value);
            rest = &after[end + 1..];
        }
        output.push_str(rest);

        Ok(output)
    }
}

//! Configuration management for the relay
//!
//! Layering, lowest priority first: built-in defaults, an optional TOML file,
//! then `RELAYCHAIN_*` environment variables. The binary applies its own
//! command-line flags on top of the result.

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::protocol::MAX_FRAME_LEN;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,

    /// Ledger and registry storage
    pub store: StoreConfig,

    /// Per-field frame limits
    pub protocol: ProtocolConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the ledger, the member list and the lock file
    pub data_dir: PathBuf,

    /// Ledger file name inside `data_dir`
    pub ledger_file: String,

    /// Member list file name inside `data_dir`
    pub members_file: String,

    /// Re-verify the whole chain at startup instead of only the tail record
    pub verify_on_start: bool,
}

/// Maximum accepted payload length for each inbound field
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub max_identity_len: usize,
    pub max_username_len: usize,
    pub max_action_len: usize,
    pub max_ciphertext_len: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 12345)),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            ledger_file: "ledger.jsonl".to_string(),
            members_file: "members.txt".to_string(),
            verify_on_start: false,
        }
    }
}

impl StoreConfig {
    /// Store rooted at `data_dir` with default file names
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger_file)
    }

    pub fn members_path(&self) -> PathBuf {
        self.data_dir.join(&self.members_file)
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_identity_len: 2048,
            max_username_len: 1024,
            max_action_len: 1024,
            max_ciphertext_len: 2048,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    ///
    /// Environment variables follow the pattern: RELAYCHAIN_<SECTION>_<KEY>
    /// Example: RELAYCHAIN_SERVER_BIND_ADDRESS=0.0.0.0:12345
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; absent keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Override fields from `RELAYCHAIN_*` environment variables
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(addr) = env_override("RELAYCHAIN_SERVER_BIND_ADDRESS")? {
            self.server.bind_address = addr;
        }
        if let Some(dir) = env_override("RELAYCHAIN_STORE_DATA_DIR")? {
            self.store.data_dir = dir;
        }
        if let Some(verify) = env_override("RELAYCHAIN_STORE_VERIFY_ON_START")? {
            self.store.verify_on_start = verify;
        }
        if let Some(level) = env_override("RELAYCHAIN_LOG_LEVEL")? {
            self.logging.level = level;
        }
        if let Some(json) = env_override("RELAYCHAIN_LOG_JSON")? {
            self.logging.json_format = json;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.ledger_file.trim().is_empty() || self.store.members_file.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "ledger_file and members_file must not be empty".to_string(),
            ));
        }
        if self.store.ledger_file == self.store.members_file {
            return Err(ConfigError::Invalid(
                "ledger_file and members_file must differ".to_string(),
            ));
        }

        let limits = [
            ("max_identity_len", self.protocol.max_identity_len),
            ("max_username_len", self.protocol.max_username_len),
            ("max_action_len", self.protocol.max_action_len),
            ("max_ciphertext_len", self.protocol.max_ciphertext_len),
        ];
        for (name, value) in limits {
            if value == 0 || value > MAX_FRAME_LEN {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 1 and {} bytes, got {}",
                    name, MAX_FRAME_LEN, value
                )));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Parse `var` if it is set
fn env_override<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Env {
                var,
                reason: e.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

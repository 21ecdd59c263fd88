//! Configuration file management.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use finder_exchange::service::ExchangeSettings;

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub sweeps: SweepConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
}

/// Contact exchange behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Lifetime of a request when the caller does not ask for one.
    #[serde(default = "default_expiration_hours")]
    pub default_expiration_hours: u64,
    /// Records fetched per sweep query.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: u32,
    /// Page size for audit queries that do not set one.
    #[serde(default = "default_audit_query_limit")]
    pub audit_query_limit: i64,
}

/// Background sweep schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// 0 disables scheduled rotation.
    #[serde(default)]
    pub key_rotation_interval_hours: u64,
}

/// Key-at-rest protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Environment variable holding the key-at-rest passphrase.
    #[serde(default = "default_passphrase_env")]
    pub passphrase_env: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Per-subscriber event buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_expiration_hours() -> u64 {
    finder_types::DEFAULT_EXPIRATION_HOURS
}

fn default_sweep_batch_size() -> u32 {
    100
}

fn default_audit_query_limit() -> i64 {
    i64::from(finder_types::DEFAULT_AUDIT_LIMIT)
}

fn default_expiry_interval() -> u64 {
    300
}

fn default_cleanup_interval() -> u64 {
    900
}

fn default_passphrase_env() -> String {
    "FINDER_KEY_PASSPHRASE".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_buffer() -> usize {
    1000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            default_expiration_hours: default_expiration_hours(),
            sweep_batch_size: default_sweep_batch_size(),
            audit_query_limit: default_audit_query_limit(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            expiry_interval_secs: default_expiry_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            key_rotation_interval_hours: 0,
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            passphrase_env: default_passphrase_env(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl ExchangeConfig {
    pub fn settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            default_expiration_hours: self.default_expiration_hours,
            sweep_batch_size: self.sweep_batch_size,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::parse(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("FINDER_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Finder")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".finder")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/finder"))
}

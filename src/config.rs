//! Configuration module for Stowage.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, StowageError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/stowage.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Object store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Base directory for the filesystem-backed object store.
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "data/objects".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Quota defaults applied when a subject's ledger row is lazily created.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Default byte limit for tenant-level quotas (10 GiB).
    #[serde(default = "default_tenant_limit")]
    pub default_tenant_limit_bytes: i64,
    /// Default byte limit for user-level quotas (1 GiB).
    #[serde(default = "default_user_limit")]
    pub default_user_limit_bytes: i64,
    /// Default file-count limit, if any. None means unlimited.
    #[serde(default)]
    pub default_file_count_limit: Option<i64>,
}

fn default_tenant_limit() -> i64 {
    10 * 1024 * 1024 * 1024
}

fn default_user_limit() -> i64 {
    1024 * 1024 * 1024
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_tenant_limit_bytes: default_tenant_limit(),
            default_user_limit_bytes: default_user_limit(),
            default_file_count_limit: None,
        }
    }
}

/// Upload policy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Part size for multipart transfers in bytes (5 MiB).
    #[serde(default = "default_part_size")]
    pub part_size_bytes: i64,
    /// How long a multipart session stays claimable before the reaper
    /// may reclaim it, in days.
    #[serde(default = "default_session_ttl")]
    pub session_ttl_days: i64,
    /// Maximum accepted filename length in characters.
    #[serde(default = "default_max_filename")]
    pub max_filename_length: usize,
}

fn default_part_size() -> i64 {
    5 * 1024 * 1024
}

fn default_session_ttl() -> i64 {
    7
}

fn default_max_filename() -> usize {
    255
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            part_size_bytes: default_part_size(),
            session_ttl_days: default_session_ttl(),
            max_filename_length: default_max_filename(),
        }
    }
}

/// Expiry reaper configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,
    /// Maximum expired sessions handled per sweep.
    #[serde(default = "default_reaper_batch")]
    pub batch_size: u32,
    /// Usage percentage at which a quota-pressure warning is emitted.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_percent: i64,
    /// Minimum seconds between repeated warnings for the same quota.
    #[serde(default = "default_alert_interval")]
    pub alert_interval_secs: i64,
}

fn default_reaper_interval() -> u64 {
    300
}

fn default_reaper_batch() -> u32 {
    100
}

fn default_alert_threshold() -> i64 {
    90
}

fn default_alert_interval() -> i64 {
    3600
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reaper_interval(),
            batch_size: default_reaper_batch(),
            alert_threshold_percent: default_alert_threshold(),
            alert_interval_secs: default_alert_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/stowage.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Object store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Quota defaults.
    #[serde(default)]
    pub quota: QuotaConfig,
    /// Upload policy.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Reaper settings.
    #[serde(default)]
    pub reaper: ReaperConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StowageError::Config(e.to_string()))
    }
}

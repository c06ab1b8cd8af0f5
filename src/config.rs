//! Service configuration
//!
//! Loaded from a JSON file and validated before anything binds a socket:
//!
//! ```json
//! {
//!   "storage_dir": "./data",
//!   "secret": "change-me",
//!   "public_url": "http://localhost:8080",
//!   "http": { "host": "0.0.0.0", "port": 8080 },
//!   "adapters": [ { "base_path": "/uploads" } ],
//!   "gc": { "retention_secs": 86400, "interval_secs": 600 }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::file_storage::gc::{DEFAULT_GC_INTERVAL_SECS, DEFAULT_RETENTION_SECS};
use crate::file_storage::{AdapterSettings, StorageError, StorageResult};
use crate::http_server::HttpServerConfig;

/// Upper bound for every configured duration (retention, sweep interval, URL
/// lifetime): 100 years.
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// `secs` as a chrono duration, rejecting zero and anything above
/// [`MAX_DURATION_SECS`]
pub fn bounded_seconds(field: &str, secs: u64) -> StorageResult<Duration> {
    if secs == 0 || secs > MAX_DURATION_SECS {
        return Err(StorageError::ConfigError(format!(
            "{} must be between 1 and {} seconds, got {}",
            field, MAX_DURATION_SECS, secs
        )));
    }
    Duration::try_seconds(secs as i64)
        .ok_or_else(|| StorageError::ConfigError(format!("{} is out of range", field)))
}

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding object bytes and the per-adapter stores (required)
    pub storage_dir: PathBuf,

    /// Shared secret for URL signatures (required, non-empty)
    pub secret: String,

    /// Externally reachable URL the issued links point at
    #[serde(default = "default_public_url")]
    pub public_url: String,

    #[serde(default)]
    pub http: HttpServerConfig,

    #[serde(default = "default_adapters")]
    pub adapters: Vec<AdapterConfig>,

    #[serde(default)]
    pub gc: GcConfig,

    /// TTL for URLs issued from the command line
    #[serde(default = "default_url_ttl_secs")]
    pub default_url_ttl_secs: u64,

    /// Emit JSON log lines instead of the compact format
    #[serde(default)]
    pub json_logs: bool,
}

/// One adapter instance mounted on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub base_path: String,

    #[serde(default)]
    pub public: bool,

    #[serde(default)]
    pub public_base_path: Option<String>,
}

/// Garbage collection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcConfig {
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl GcConfig {
    pub fn retention(&self) -> StorageResult<Duration> {
        bounded_seconds("gc.retention_secs", self.retention_secs)
    }

    pub fn interval(&self) -> StdDuration {
        StdDuration::from_secs(self.interval_secs)
    }
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_adapters() -> Vec<AdapterConfig> {
    vec![AdapterConfig {
        base_path: "/uploads".to_string(),
        public: false,
        public_base_path: None,
    }]
}

fn default_retention_secs() -> u64 {
    DEFAULT_RETENTION_SECS
}

fn default_interval_secs() -> u64 {
    DEFAULT_GC_INTERVAL_SECS
}

fn default_url_ttl_secs() -> u64 {
    3600
}

impl Config {
    /// A fresh configuration with default settings
    pub fn new(storage_dir: impl AsRef<Path>, secret: impl Into<String>) -> Self {
        Self {
            storage_dir: storage_dir.as_ref().to_path_buf(),
            secret: secret.into(),
            public_url: default_public_url(),
            http: HttpServerConfig::default(),
            adapters: default_adapters(),
            gc: GcConfig::default(),
            default_url_ttl_secs: default_url_ttl_secs(),
            json_logs: false,
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> StorageResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StorageError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| StorageError::ConfigError(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Write configuration to file as pretty JSON
    pub fn save(&self, path: &Path) -> StorageResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| StorageError::Internal(format!("serializing config: {}", e)))?;
        fs::write(path, content)
            .map_err(|e| StorageError::ConfigError(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Checks that do not touch the filesystem. Directory usability is
    /// checked when adapters open.
    pub fn validate(&self) -> StorageResult<()> {
        if self.secret.trim().is_empty() {
            return Err(StorageError::ConfigError("secret must not be empty".to_string()));
        }

        if self.adapters.is_empty() {
            return Err(StorageError::ConfigError("at least one adapter is required".to_string()));
        }

        self.gc.retention()?;
        bounded_seconds("gc.interval_secs", self.gc.interval_secs)?;
        self.default_url_ttl()?;

        let url = self.public_url()?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(StorageError::ConfigError(format!(
                "public_url must be http(s), got {}",
                url.scheme()
            )));
        }

        Ok(())
    }

    pub fn public_url(&self) -> StorageResult<Url> {
        Url::parse(&self.public_url)
            .map_err(|e| StorageError::ConfigError(format!("Invalid public_url: {}", e)))
    }

    pub fn default_url_ttl(&self) -> StorageResult<Duration> {
        bounded_seconds("default_url_ttl_secs", self.default_url_ttl_secs)
    }

    /// Adapter settings in configuration order
    pub fn adapter_settings(&self) -> StorageResult<Vec<AdapterSettings>> {
        let public_url = self.public_url()?;
        Ok(self
            .adapters
            .iter()
            .map(|adapter| {
                let mut settings = AdapterSettings::new(
                    &adapter.base_path,
                    public_url.clone(),
                    &self.storage_dir,
                    self.secret.as_bytes(),
                );
                settings.public = adapter.public;
                settings.public_base_path = adapter.public_base_path.clone();
                settings
            })
            .collect())
    }
}

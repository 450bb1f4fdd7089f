//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest declared content length accepted for an upload, in bytes.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: u64,
    /// Size of each read from the request body, in bytes.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Seconds an upload session may sit unclaimed before it is evicted.
    #[serde(default = "default_session_grace_secs")]
    pub session_grace_secs: u64,
    /// Seconds a completed session stays pollable if nobody polls it.
    #[serde(default = "default_completed_retention_secs")]
    pub completed_retention_secs: u64,
    /// Default and maximum number of entries returned by listing endpoints.
    #[serde(default = "default_listing_limit")]
    pub listing_limit: u32,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_upload_size() -> u64 {
    crate::DEFAULT_MAX_UPLOAD_SIZE
}

fn default_read_chunk_size() -> usize {
    crate::DEFAULT_READ_CHUNK_SIZE
}

fn default_session_grace_secs() -> u64 {
    crate::DEFAULT_SESSION_GRACE_SECS
}

fn default_completed_retention_secs() -> u64 {
    300
}

fn default_listing_limit() -> u32 {
    100
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_size: default_max_upload_size(),
            read_chunk_size: default_read_chunk_size(),
            session_grace_secs: default_session_grace_secs(),
            completed_retention_secs: default_completed_retention_secs(),
            listing_limit: default_listing_limit(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Grace period for unclaimed sessions.
    pub fn session_grace(&self) -> Duration {
        Duration::from_secs(self.session_grace_secs)
    }

    /// Retention period for completed sessions.
    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_upload_size == 0 {
            return Err("server.max_upload_size must be greater than 0".to_string());
        }
        if self.read_chunk_size == 0 {
            return Err("server.read_chunk_size must be greater than 0".to_string());
        }
        if self.session_grace_secs == 0 {
            return Err("server.session_grace_secs must be at least 1 second".to_string());
        }
        if self.listing_limit == 0 {
            return Err("server.listing_limit must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage. Committed files live in `<path>/files`.
        path: PathBuf,
        /// Directory for in-flight uploads (default: `<path>/staging`).
        /// Must be on the same filesystem as `path` so commits can rename.
        #[serde(default)]
        staging_path: Option<PathBuf>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
            staging_path: None,
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path, staging_path } => {
                if path.as_os_str().is_empty() {
                    return Err("storage.path cannot be empty".to_string());
                }
                if let Some(staging) = staging_path
                    && staging.as_os_str().is_empty()
                {
                    return Err("storage.staging_path cannot be empty when set".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds (advisory only, SQLite cannot cancel queries).
        /// Queries exceeding this duration are logged.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { path, .. } if path.as_os_str().is_empty() => {
                Err("metadata.path cannot be empty".to_string())
            }
            MetadataConfig::Sqlite { .. } => Ok(()),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage and SQLite metadata
    /// at their default relative paths; tests override the paths.
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> crate::Result<()> {
        self.server.validate().map_err(crate::Error::Config)?;
        self.storage.validate().map_err(crate::Error::Config)?;
        self.metadata.validate().map_err(crate::Error::Config)?;
        Ok(())
    }
}

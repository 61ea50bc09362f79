//! Configuration management
//!
//! All components receive their configuration at construction; nothing reads
//! process-global state after startup. Values come from the environment with
//! local-development defaults.

use std::env;
use std::path::PathBuf;

use mdp_common::Result;
use serde::{Deserialize, Serialize};

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default warehouse project identifier.
pub const DEFAULT_PROJECT: &str = "mdp-local";

/// Default warehouse namespace (dataset) name.
pub const DEFAULT_NAMESPACE: &str = "letterboxd";

/// Default local staging directory.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Default maximum rows per load chunk.
pub const DEFAULT_CHUNK_ROWS: usize = 500_000;

/// Default bound on concurrently running pipeline tasks.
pub const DEFAULT_WORKER_LIMIT: usize = 4;

/// Default fetch retry budget (attempts, not retries).
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Warehouse project; first segment of fully qualified table names.
    pub project: String,
    /// Warehouse namespace; second segment of fully qualified table names.
    pub namespace: String,
    /// Directory holding local staged parquet files.
    pub data_dir: PathBuf,
    /// Maximum rows per warehouse load chunk.
    pub chunk_rows: usize,
    /// Maximum concurrently running pipeline tasks.
    pub worker_limit: usize,
    /// Fetch attempt budget for transient source failures.
    pub fetch_attempts: u32,
}

impl EtlConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = EtlConfig {
            project: env::var("MDP_PROJECT").unwrap_or_else(|_| DEFAULT_PROJECT.to_string()),
            namespace: env::var("MDP_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string()),
            data_dir: env::var("MDP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR)),
            chunk_rows: env::var("MDP_CHUNK_ROWS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CHUNK_ROWS),
            worker_limit: env::var("MDP_WORKER_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_WORKER_LIMIT),
            fetch_attempts: env::var("MDP_FETCH_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FETCH_ATTEMPTS),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        use mdp_common::EtlError;

        if self.project.is_empty() {
            return Err(EtlError::Config("project cannot be empty".into()));
        }
        if self.namespace.is_empty() {
            return Err(EtlError::Config("namespace cannot be empty".into()));
        }
        if self.chunk_rows == 0 {
            return Err(EtlError::Config("chunk_rows must be greater than 0".into()));
        }
        if self.worker_limit == 0 {
            return Err(EtlError::Config("worker_limit must be greater than 0".into()));
        }
        if self.fetch_attempts == 0 {
            return Err(EtlError::Config("fetch_attempts must be greater than 0".into()));
        }

        Ok(())
    }
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            project: DEFAULT_PROJECT.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            worker_limit: DEFAULT_WORKER_LIMIT,
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
        }
    }
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
}

impl StorageConfig {
    pub fn from_env() -> StorageConfig {
        StorageConfig {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "mdp-data".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .unwrap_or_else(|_| "minioadmin".to_string()),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: "us-east-1".to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
        }
    }
}

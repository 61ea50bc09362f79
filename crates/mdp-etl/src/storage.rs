//! Object store abstraction
//!
//! Staged artifacts live in an object store behind the [`ObjectStore`] trait
//! so the pipeline can run against S3-compatible storage in production and an
//! in-memory store in tests. Handles are stateless and safely shared across
//! concurrent tasks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use mdp_common::{EtlError, Result};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::config::StorageConfig;

/// Result of a successful upload.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub key: String,
    pub checksum: String,
    pub size: i64,
}

/// Minimal object-store surface the pipeline needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store an object, overwriting any previous object at the key.
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<PutResult>;

    /// Retrieve an object. A missing key is [`EtlError::ArtifactNotFound`].
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Whether an object exists at the key.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// S3-compatible object store (AWS S3 or MinIO).
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: StorageConfig) -> Self {
        debug!("Initializing object store for bucket: {}", config.bucket);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "mdp-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Object store client initialized for bucket: {}", config.bucket);

        Self {
            client,
            bucket: config.bucket,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, data))]
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<PutResult> {
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;

        debug!("Uploading {} bytes to s3://{}/{}", size, self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| EtlError::Staging(format!("upload s3://{}/{}: {}", self.bucket, key, e)))?;

        info!("Uploaded s3://{}/{}", self.bucket, key);

        Ok(PutResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", self.bucket, key);

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    return Err(EtlError::ArtifactNotFound(key.to_string()));
                }
                return Err(EtlError::Staging(format!(
                    "download s3://{}/{}: {}",
                    self.bucket, key, service_err
                )));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| EtlError::Staging(format!("read s3://{}/{}: {}", self.bucket, key, e)))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);

        Ok(data)
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(EtlError::Staging(format!(
                        "head s3://{}/{}: {}",
                        self.bucket, key, service_err
                    )))
                }
            }
        }
    }
}

/// In-memory object store for tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, for assertions.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<PutResult> {
        let checksum = calculate_sha256(&data);
        let size = data.len() as i64;
        self.objects.write().await.insert(key.to_string(), data);
        Ok(PutResult {
            key: key.to_string(),
            checksum,
            size,
        })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| EtlError::ArtifactNotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }
}

fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

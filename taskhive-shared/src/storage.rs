//! Attachment blob storage
//!
//! Task attachments are stored outside the database behind the [`BlobStore`]
//! trait. The database keeps only the returned URL and `external_id`, which
//! is what a later delete needs.
//!
//! # Backends
//!
//! - [`LocalBlobStore`]: files on local disk, served by the API under a
//!   public base URL
//! - [`CloudinaryBlobStore`]: signed uploads to Cloudinary
//! - [`DisabledBlobStore`]: rejects uploads; deletes are no-ops
//!
//! Deletes that happen as part of a cascade are best-effort. A failure is
//! logged by the caller and never aborts the cascade.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Attachment storage is disabled")]
    Disabled,

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote store answered, but not with success
    #[error("Storage provider error: {0}")]
    Upstream(String),
}

/// A file received from a client
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

/// Where a stored file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub url: String,

    /// Backend-specific key accepted by [`BlobStore::delete`]
    pub external_id: String,

    pub size: i64,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn put(&self, file: UploadFile) -> Result<StoredBlob, StorageError>;

    async fn delete(&self, external_id: &str) -> Result<(), StorageError>;
}

/// Reduces a client-supplied filename to a safe single path component
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.chars().take(100).collect()
    }
}

/// Stores files in a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let is_single_component = !key.is_empty()
            && !key.contains(['/', '\\'])
            && key != "."
            && key != "..";

        if !is_single_component {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(&self, file: UploadFile) -> Result<StoredBlob, StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;

        let key = format!("{}-{}", Uuid::new_v4(), sanitize_filename(&file.filename));
        let path = self.path_for(&key)?;
        tokio::fs::write(&path, &file.data).await?;

        debug!(key = %key, size = file.data.len(), "Stored attachment on local disk");

        Ok(StoredBlob {
            url: format!("{}/{}", self.public_base_url, key),
            external_id: key,
            size: file.data.len() as i64,
        })
    }

    async fn delete(&self, external_id: &str) -> Result<(), StorageError> {
        let path = self.path_for(external_id)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already gone counts as deleted
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Rejects uploads; used when no storage backend is configured
#[derive(Debug, Clone, Default)]
pub struct DisabledBlobStore;

#[async_trait]
impl BlobStore for DisabledBlobStore {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn put(&self, _file: UploadFile) -> Result<StoredBlob, StorageError> {
        Err(StorageError::Disabled)
    }

    async fn delete(&self, _external_id: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Cloudinary credentials
#[derive(Debug, Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

/// Stores files on Cloudinary using signed uploads
///
/// Requests are signed with SHA-256, so the Cloudinary account must be set to
/// SHA-256 signatures. `external_id` is `"{resource_type}/{public_id}"`,
/// since destroy calls need both parts.
#[derive(Debug, Clone)]
pub struct CloudinaryBlobStore {
    config: CloudinaryConfig,
    client: reqwest::Client,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct CloudinaryUploadResponse {
    secure_url: String,
    public_id: String,
    resource_type: String,
    bytes: i64,
}

#[derive(Debug, Deserialize)]
struct CloudinaryDestroyResponse {
    result: String,
}

impl CloudinaryBlobStore {
    pub fn new(config: CloudinaryConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            api_base: "https://api.cloudinary.com/v1_1".to_string(),
        }
    }

    /// Signs request parameters: sorted `key=value` pairs joined by `&`,
    /// followed by the API secret
    fn sign(&self, params: &[(&str, &str)]) -> String {
        let mut sorted = params.to_vec();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let joined = sorted
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        hasher.update(self.config.api_secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn endpoint(&self, resource_type: &str, action: &str) -> String {
        format!("{}/{}/{}/{}", self.api_base, self.config.cloud_name, resource_type, action)
    }
}

/// Splits an external id into `(resource_type, public_id)`
fn split_external_id(external_id: &str) -> Result<(&str, &str), StorageError> {
    external_id
        .split_once('/')
        .filter(|(kind, id)| !kind.is_empty() && !id.is_empty())
        .ok_or_else(|| StorageError::InvalidKey(external_id.to_string()))
}

#[async_trait]
impl BlobStore for CloudinaryBlobStore {
    fn name(&self) -> &'static str {
        "cloudinary"
    }

    async fn put(&self, file: UploadFile) -> Result<StoredBlob, StorageError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("timestamp", timestamp.as_str())]);

        let part = reqwest::multipart::Part::bytes(file.data.to_vec())
            .file_name(sanitize_filename(&file.filename))
            .mime_str(&file.content_type)?;

        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature);

        let response = self
            .client
            .post(self.endpoint("auto", "upload"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Upstream(format!("upload returned {}: {}", status, body)));
        }

        let uploaded: CloudinaryUploadResponse = response.json().await?;

        Ok(StoredBlob {
            url: uploaded.secure_url,
            external_id: format!("{}/{}", uploaded.resource_type, uploaded.public_id),
            size: uploaded.bytes,
        })
    }

    async fn delete(&self, external_id: &str) -> Result<(), StorageError> {
        let (resource_type, public_id) = split_external_id(external_id)?;
        let timestamp = Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", public_id), ("timestamp", timestamp.as_str())]);

        let response = self
            .client
            .post(self.endpoint(resource_type, "destroy"))
            .form(&[
                ("public_id", public_id),
                ("api_key", self.config.api_key.as_str()),
                ("timestamp", timestamp.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::Upstream(format!("destroy returned {}", response.status())));
        }

        let destroyed: CloudinaryDestroyResponse = response.json().await?;
        match destroyed.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(StorageError::Upstream(format!("destroy result: {}", other))),
        }
    }
}

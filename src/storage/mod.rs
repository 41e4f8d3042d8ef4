//! Content-addressed blob storage for attachments.
//!
//! Blobs are keyed by the SHA-256 of their content and laid out per tenant:
//! `tenants/<tenant_id>/<h[0..2]>/<h[2..4]>/<h>`. Identical uploads within a
//! tenant share one blob, so deleting an attachment row never removes the file.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write `data` at `path`; returns `false` when the blob was already present.
    async fn put(&self, path: &str, data: &[u8]) -> Result<bool, StorageError>;

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
}

pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative storage path under the root, refusing anything that
    /// could escape it.
    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative.is_absolute()
            || relative.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn put(&self, path: &str, data: &[u8]) -> Result<bool, StorageError> {
        if self.exists(path).await? {
            debug!(storage_path = %path, "storage: blob already present, skipping write");
            return Ok(false);
        }

        let full_path = self.full_path(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "storage: create_dir_all failed");
                e
            })?;
        }

        // Atomic write: unique temp file + rename
        let temp_path = full_path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &full_path).await {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "storage: rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(storage_path = %path, size = data.len(), "storage: blob written");
        Ok(true)
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(path.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(full_path).await?)
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// `tenants/<tenant_id>/<h[0..2]>/<h[2..4]>/<h>`
pub fn storage_path(tenant_id: Uuid, checksum: &str) -> String {
    format!(
        "tenants/{}/{}/{}/{}",
        tenant_id,
        &checksum[0..2],
        &checksum[2..4],
        checksum
    )
}

/// Verify blob content against the checksum recorded at upload time.
pub fn verify_checksum(path: &str, data: &[u8], expected: &str) -> Result<(), StorageError> {
    let actual = compute_checksum(data);
    if actual != expected {
        return Err(StorageError::ChecksumMismatch {
            path: path.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Keep only the last path segment, drop control characters and quotes,
/// and cap the name at 255 bytes on a char boundary.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim().to_string();

    if cleaned.is_empty() {
        return "file".to_string();
    }

    let mut end = cleaned.len().min(255);
    while !cleaned.is_char_boundary(end) {
        end -= 1;
    }
    cleaned[..end].to_string()
}

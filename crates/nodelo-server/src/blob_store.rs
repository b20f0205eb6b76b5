//! Attachment storage.
//!
//! The engine only sees the [`BlobStorage`] trait: hand over bytes and a
//! mimetype, get back a stable URL and storage id. [`DiskBlobStore`] keeps
//! each file under `<base>/<uuid>` with its mimetype in `<base>/<uuid>.type`,
//! and the API serves them from `GET /api/files/{id}`.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServerError;

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub url: String,
    pub storage_id: String,
    pub size: usize,
}

/// A stored file read back for download.
#[derive(Debug, Clone)]
pub struct BlobContent {
    pub data: Bytes,
    pub mimetype: String,
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Persist `data`. Failures surface as [`ServerError::Upload`].
    async fn upload(&self, data: Bytes, mimetype: &str) -> Result<StoredBlob, ServerError>;

    async fn fetch(&self, storage_id: &str) -> Result<BlobContent, ServerError>;

    async fn delete(&self, storage_id: &str) -> Result<(), ServerError>;
}

/// Reject anything that would escape `base` once joined to it.
fn ensure_within(base: &Path, name: &str) -> Result<PathBuf, ServerError> {
    let relative = Path::new(name);
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(base.join(relative)),
        _ => Err(ServerError::BadRequest("Invalid file id".to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct DiskBlobStore {
    base_path: PathBuf,
    public_base_url: String,
}

impl DiskBlobStore {
    pub async fn new(base_path: PathBuf, public_base_url: &str) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn paths(&self, storage_id: &str) -> Result<(PathBuf, PathBuf), ServerError> {
        // Only ids we minted are valid; this also rules out traversal.
        let id = Uuid::parse_str(storage_id)
            .map_err(|_| ServerError::NotFound("File"))?
            .to_string();
        let data = ensure_within(&self.base_path, &id)?;
        let meta = ensure_within(&self.base_path, &format!("{id}.type"))?;
        Ok((data, meta))
    }
}

#[async_trait]
impl BlobStorage for DiskBlobStore {
    async fn upload(&self, data: Bytes, mimetype: &str) -> Result<StoredBlob, ServerError> {
        if data.is_empty() {
            return Err(ServerError::Upload("empty file".to_string()));
        }

        let storage_id = Uuid::new_v4().to_string();
        let (path, meta) = self.paths(&storage_id)?;

        fs::write(&path, &data)
            .await
            .map_err(|e| ServerError::Upload(format!("write {storage_id}: {e}")))?;
        fs::write(&meta, mimetype.as_bytes())
            .await
            .map_err(|e| ServerError::Upload(format!("write {storage_id}.type: {e}")))?;

        debug!(id = %storage_id, size = data.len(), mimetype, "Stored attachment");

        Ok(StoredBlob {
            url: format!("{}/api/files/{}", self.public_base_url, storage_id),
            size: data.len(),
            storage_id,
        })
    }

    async fn fetch(&self, storage_id: &str) -> Result<BlobContent, ServerError> {
        let (path, meta) = self.paths(storage_id)?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServerError::NotFound("File"))
            }
            Err(e) => return Err(ServerError::Internal(format!("read {storage_id}: {e}"))),
        };
        let mimetype = fs::read_to_string(&meta)
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        Ok(BlobContent {
            data: Bytes::from(data),
            mimetype,
        })
    }

    async fn delete(&self, storage_id: &str) -> Result<(), ServerError> {
        let (path, meta) = self.paths(storage_id)?;

        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ServerError::NotFound("File")
            } else {
                ServerError::Internal(format!("delete {storage_id}: {e}"))
            }
        })?;
        let _ = fs::remove_file(&meta).await;

        debug!(id = %storage_id, "Deleted attachment");
        Ok(())
    }
}

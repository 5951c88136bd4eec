use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::payload::{parse_image_payload, resolve_filename};
use super::{GalleryEntry, GallerySource, UploadReceipt, UploadRequest, UploadSink};
use crate::config::StorageConfig;
use crate::error::{StorageError, UploadError};

/// Listing cap used when pruning, matching the hosted API's page size
const PRUNE_LIST_LIMIT: usize = 1000;

/// Outcome of a prune-to-latest pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PruneResult {
    pub kept: Option<String>,
    pub deleted: Vec<String>,
}

/// Filesystem-backed object bucket with public-URL addressing.
///
/// Objects live flat under `<storage.path>/<bucket>/`; names are single path
/// components and are never overwritten.
#[derive(Debug, Clone)]
pub struct BucketStore {
    root: PathBuf,
    bucket: String,
    endpoint: String,
    max_upload_bytes: usize,
    list_limit: usize,
    privileged: bool,
}

impl BucketStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: Path::new(&config.path).join(&config.bucket),
            bucket: config.bucket.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            max_upload_bytes: config.max_upload_bytes,
            list_limit: config.list_limit,
            privileged: config.service_role_key.is_some(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether destructive operations (prune, delete) are allowed
    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Create the bucket directory if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<(), StorageError> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            fs::create_dir_all(&self.root)
                .await
                .map_err(|e| io_error(&self.root, e))?;
            info!("Created bucket directory: {}", self.root.display());
        }
        Ok(())
    }

    pub fn public_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.endpoint, self.bucket, name
        )
    }

    /// Store a new object. Existing objects are never replaced.
    pub async fn put_object(&self, name: &str, bytes: &[u8]) -> Result<u64, StorageError> {
        let path = self.object_path(name)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists {
                    name: name.to_string(),
                },
                std::io::ErrorKind::NotFound => StorageError::BucketUnavailable {
                    bucket: self.bucket.clone(),
                    details: e.to_string(),
                },
                _ => io_error(&path, e),
            })?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!("Failed writing {}, removing partial object", path.display());
            let _ = fs::remove_file(&path).await;
            return Err(io_error(&path, e));
        }

        debug!("Stored object {} ({} bytes)", name, bytes.len());
        Ok(bytes.len() as u64)
    }

    pub async fn read_object(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(name)?;
        fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound {
                name: name.to_string(),
            },
            _ => io_error(&path, e),
        })
    }

    /// Delete one object, returning the bytes freed
    pub async fn delete_object(&self, name: &str) -> Result<u64, StorageError> {
        if !self.privileged {
            return Err(StorageError::Unprivileged);
        }

        let path = self.object_path(name)?;
        let size = fs::metadata(&path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StorageError::NotFound {
                    name: name.to_string(),
                },
                _ => io_error(&path, e),
            })?
            .len();

        fs::remove_file(&path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!("Deleted object {} ({} bytes)", name, size);
        Ok(size)
    }

    /// List objects newest first, at most `limit` entries
    pub async fn list(&self, limit: usize) -> Result<Vec<GalleryEntry>, StorageError> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::BucketUnavailable {
                bucket: self.bucket.clone(),
                details: e.to_string(),
            })?;

        let mut objects = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.root, e))?
        {
            let name = match entry.file_name().into_string() {
                Ok(name) if !name.starts_with('.') => name,
                _ => continue,
            };

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping unreadable object {}: {}", name, e);
                    continue;
                }
            };

            let uploaded_at: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            objects.push(GalleryEntry {
                url: self.public_url(&name),
                filename: name,
                uploaded_at,
                size: metadata.len(),
            });
        }

        objects.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        objects.truncate(limit);

        debug!("Listed {} objects in bucket {}", objects.len(), self.bucket);
        Ok(objects)
    }

    /// Keep only the newest object and delete everything else
    pub async fn prune_to_latest(&self) -> Result<PruneResult, StorageError> {
        if !self.privileged {
            return Err(StorageError::Unprivileged);
        }

        let objects = self.list(PRUNE_LIST_LIMIT).await?;
        let mut names = objects.into_iter().map(|entry| entry.filename);
        let kept = names.next();

        let mut deleted = Vec::new();
        for name in names {
            self.delete_object(&name).await?;
            deleted.push(name);
        }

        info!(
            "Pruned bucket {}: kept {:?}, deleted {}",
            self.bucket,
            kept,
            deleted.len()
        );
        Ok(PruneResult { kept, deleted })
    }

    /// Resolve an object name to a path directly under the bucket root
    fn object_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        let invalid = || StorageError::InvalidName {
            name: name.to_string(),
        };

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(invalid()),
        }
        if name.starts_with('.') || name.contains('\\') {
            return Err(invalid());
        }

        Ok(self.root.join(name))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait::async_trait]
impl UploadSink for BucketStore {
    async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, UploadError> {
        let payload = parse_image_payload(&request.image, self.max_upload_bytes)?;
        let filename = resolve_filename(request.filename.as_deref(), payload.mime, Utc::now())?;

        let size = self.put_object(&filename, &payload.bytes).await?;
        info!(
            "Uploaded {} ({}, {} bytes) to bucket {}",
            filename, payload.mime, size, self.bucket
        );

        Ok(UploadReceipt {
            url: self.public_url(&filename),
            path: filename.clone(),
            filename,
            size,
        })
    }

    fn backend_name(&self) -> &str {
        "local-bucket"
    }
}

#[async_trait::async_trait]
impl GallerySource for BucketStore {
    async fn list_entries(&self) -> Result<Vec<GalleryEntry>, StorageError> {
        self.list(self.list_limit).await
    }
}

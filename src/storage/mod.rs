//! Upload sink and gallery source capabilities, plus the bucket store backing them.

mod bucket;
mod payload;
#[cfg(test)]
mod tests;

pub use bucket::{BucketStore, PruneResult};
pub use payload::{default_filename, parse_image_payload, resolve_filename, ImageMime, ImagePayload};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, UploadError};

/// An image to store: base64 data URI plus an optional suggested name
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub filename: Option<String>,
}

impl UploadRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    /// Publicly resolvable URL of the stored image
    pub url: String,
    pub filename: String,
    /// Object path within the bucket
    pub path: String,
    pub size: u64,
}

/// One stored image as shown in the gallery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEntry {
    pub url: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub size: u64,
}

#[async_trait::async_trait]
pub trait UploadSink: Send + Sync {
    async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, UploadError>;

    /// Short backend identifier reported to API clients
    fn backend_name(&self) -> &str;
}

/// Read-only listing of stored images, newest first
#[async_trait::async_trait]
pub trait GallerySource: Send + Sync {
    async fn list_entries(&self) -> Result<Vec<GalleryEntry>, StorageError>;
}

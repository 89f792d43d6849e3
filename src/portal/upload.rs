use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{error::UploadError, services::BlobStore};

/// A file picked in the browser, staged until the form is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub storage_key: String,
    pub retrieval_url: String,
}

#[derive(Debug, Clone)]
pub struct UploadPipeline<B> {
    blobs: B,
}

impl<B: BlobStore> UploadPipeline<B> {
    pub fn new(blobs: B) -> Self {
        Self { blobs }
    }

    /// Stores `file` under a fresh key in `dir` and resolves its retrieval URL.
    ///
    /// The URL is only returned once the blob store has confirmed the write.
    pub async fn upload(&self, dir: &str, file: PendingFile) -> Result<UploadResult, UploadError> {
        if file.bytes.is_empty() {
            return Err(UploadError::EmptyFile);
        }

        let storage_key = storage_key(dir, &file.name);
        let size = file.bytes.len();
        let content_type = if file.content_type.is_empty() {
            "application/octet-stream"
        } else {
            file.content_type.as_str()
        };

        let handle = self
            .blobs
            .put(&storage_key, content_type, Bytes::from(file.bytes))
            .await
            .inspect_err(|err| warn!(%storage_key, %err, "upload failed"))?;
        let retrieval_url = self.blobs.retrieval_url(&handle).await?;

        info!(%storage_key, size, "uploaded file");
        Ok(UploadResult {
            storage_key,
            retrieval_url,
        })
    }
}

/// Key unique per upload, so two files with the same name never overwrite each other.
pub fn storage_key(dir: &str, file_name: &str) -> String {
    format!(
        "{}/{}_{}_{}",
        dir.trim_matches('/'),
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        sanitize_file_name(file_name)
    )
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

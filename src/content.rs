//! Client-facing content descriptor

use crate::error::{ProxyError, ProxyResult};
use crate::storage::{Blob, CacheInfo, HashAlgorithm, Hashes, TempBlob};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Where the bytes of a [`Content`] live
#[derive(Debug)]
enum Payload {
    /// A committed blob
    Blob(PathBuf),
    /// A staged file that is deleted when the content is dropped
    Staged(TempPath),
}

/// Attributes travelling with a payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentAttributes {
    /// Name of the asset this content was stored as
    pub asset_name: Option<String>,
    pub hashes: Hashes,
    /// Client-visible validator derived from the hashes
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub cache_info: Option<CacheInfo>,
}

/// Bytes plus content type and validator attributes
#[derive(Debug)]
pub struct Content {
    payload: Payload,
    pub content_type: String,
    pub size: u64,
    pub attributes: ContentAttributes,
}

impl Content {
    /// Content backed by a committed blob
    pub fn from_blob(blob: &Blob, content_type: impl Into<String>, attributes: ContentAttributes) -> Self {
        Self {
            payload: Payload::Blob(blob.path.clone()),
            content_type: content_type.into(),
            size: blob.size,
            attributes,
        }
    }

    /// Content backed by a temp blob that will never be stored
    pub fn staged(temp: TempBlob, content_type: impl Into<String>, last_modified: Option<DateTime<Utc>>) -> Self {
        let hashes = temp.hashes().clone();
        let size = temp.size();
        Self {
            content_type: content_type.into(),
            size,
            attributes: ContentAttributes {
                asset_name: None,
                etag: etag_from_hashes(&hashes),
                hashes,
                last_modified,
                cache_info: None,
            },
            payload: Payload::Staged(temp.into_temp_path()),
        }
    }

    pub fn path(&self) -> &Path {
        match &self.payload {
            Payload::Blob(path) => path,
            Payload::Staged(path) => path,
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.attributes.etag.as_deref()
    }

    /// Open the payload for streaming
    pub async fn open(&self) -> ProxyResult<File> {
        File::open(self.path())
            .await
            .map_err(|e| ProxyError::io(format!("opening content {}", self.path().display()), e))
    }

    /// Read the whole payload into memory
    pub async fn read_to_vec(&self) -> ProxyResult<Vec<u8>> {
        let mut file = self.open().await?;
        let mut bytes = Vec::with_capacity(self.size as usize);
        file.read_to_end(&mut bytes)
            .await
            .map_err(|e| ProxyError::io(format!("reading content {}", self.path().display()), e))?;
        Ok(bytes)
    }
}

/// Quoted legacy digest, falling back to sha256
pub fn etag_from_hashes(hashes: &Hashes) -> Option<String> {
    hashes
        .get(&HashAlgorithm::Sha1)
        .or_else(|| hashes.get(&HashAlgorithm::Sha256))
        .map(|digest| format!("\"{}\"", digest))
}

//! Content-addressed blob storage
//!
//! Bytes are first streamed into a temp blob under `<root>/tmp`, hashed on
//! the way in. Committing renames the temp file to
//! `<root>/content/<aa>/<sha256>.bytes` next to a `.properties` JSON
//! sidecar. A blob that already exists is never rewritten; committing the
//! same content twice yields the existing blob and discards the temp file.

use crate::error::{ProxyError, ProxyResult};
use crate::storage::hash::{HashAlgorithm, Hashes, MultiHasher};
use crate::storage::model::{Blob, BlobRef};
use async_trait::async_trait;
use chrono::Utc;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tempfile::{NamedTempFile, TempPath};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Immutable byte storage addressed by content hash
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Name recorded in every [`BlobRef`] this store hands out
    fn name(&self) -> &str;

    /// Open a writer staging bytes into a temp blob
    async fn create_temp(&self, algorithms: &[HashAlgorithm]) -> ProxyResult<TempBlobWriter>;

    /// Move a temp blob into permanent storage
    async fn commit(&self, temp: TempBlob) -> ProxyResult<Blob>;

    /// Look up a committed blob; `None` when it does not exist
    async fn get(&self, blob_ref: &BlobRef) -> ProxyResult<Option<Blob>>;
}

/// Staged bytes with their digests. The file is deleted on drop unless
/// committed.
#[derive(Debug)]
pub struct TempBlob {
    path: TempPath,
    size: u64,
    hashes: Hashes,
}

impl TempBlob {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn hashes(&self) -> &Hashes {
        &self.hashes
    }

    /// Content address: the sha256 digest
    pub fn blob_id(&self) -> ProxyResult<&str> {
        self.hashes
            .get(&HashAlgorithm::Sha256)
            .map(String::as_str)
            .ok_or_else(|| ProxyError::MissingDigest {
                algorithm: HashAlgorithm::Sha256.to_string(),
            })
    }

    /// Give up on committing and keep the staged file as a plain temp path
    pub fn into_temp_path(self) -> TempPath {
        self.path
    }
}

/// Async writer that hashes everything written through it
pub struct TempBlobWriter {
    file: fs::File,
    path: TempPath,
    hasher: MultiHasher,
    size: u64,
}

impl TempBlobWriter {
    /// Create a writer over a fresh temp file in `dir`
    pub async fn create_in(dir: &Path, algorithms: &[HashAlgorithm]) -> ProxyResult<Self> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| ProxyError::io(format!("creating temp dir {}", dir.display()), e))?;

        let path = NamedTempFile::new_in(dir)
            .map_err(|e| ProxyError::io("creating temp blob", e))?
            .into_temp_path();
        let file = fs::File::create(&path)
            .await
            .map_err(|e| ProxyError::io(format!("opening temp blob {}", path.display()), e))?;

        Ok(Self {
            file,
            path,
            hasher: MultiHasher::new(algorithms),
            size: 0,
        })
    }

    /// Flush and close the file, returning the staged blob
    pub async fn finish(mut self) -> ProxyResult<TempBlob> {
        self.file
            .flush()
            .await
            .map_err(|e| ProxyError::io("flushing temp blob", e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| ProxyError::io("syncing temp blob", e))?;

        let Self {
            file,
            path,
            hasher,
            size,
        } = self;
        drop(file);

        Ok(TempBlob {
            path,
            size,
            hashes: hasher.finalize(),
        })
    }
}

impl AsyncWrite for TempBlobWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.file).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                this.size += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_shutdown(cx)
    }
}

/// Blob store on the local filesystem
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    name: String,
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn content_path(&self, id: &str, extension: &str) -> PathBuf {
        let prefix = id.get(..2).unwrap_or("00");
        self.root
            .join("content")
            .join(prefix)
            .join(format!("{}.{}", id, extension))
    }
}

fn valid_blob_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

impl FileBlobStore {
    fn read_blob_blocking(&self, id: &str) -> ProxyResult<Option<Blob>> {
        let props_path = self.content_path(id, "properties");
        let bytes_path = self.content_path(id, "bytes");
        if !props_path.exists() || !bytes_path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read(&props_path)
            .map_err(|e| ProxyError::io(format!("reading {}", props_path.display()), e))?;
        let mut blob: Blob = serde_json::from_slice(&raw)?;
        blob.path = bytes_path;
        Ok(Some(blob))
    }

    fn commit_blocking(&self, temp: TempBlob) -> ProxyResult<Blob> {
        let id = temp.blob_id()?.to_string();
        if !valid_blob_id(&id) {
            return Err(ProxyError::BlobCommit {
                blob_id: id,
                reason: "not a sha256 digest".to_string(),
            });
        }

        if let Some(existing) = self.read_blob_blocking(&id)? {
            debug!("Blob {} already stored, discarding temp copy", existing.blob_ref);
            return Ok(existing);
        }

        let bytes_path = self.content_path(&id, "bytes");
        let parent = bytes_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        std::fs::create_dir_all(&parent)
            .map_err(|e| ProxyError::io(format!("creating {}", parent.display()), e))?;

        let TempBlob { path, size, hashes } = temp;
        path.persist(&bytes_path).map_err(|e| ProxyError::BlobCommit {
            blob_id: id.clone(),
            reason: e.error.to_string(),
        })?;

        let blob = Blob {
            blob_ref: BlobRef {
                store: self.name.clone(),
                id: id.clone(),
            },
            size,
            hashes,
            created_at: Utc::now(),
            path: bytes_path,
        };

        // Properties land last: a blob without them does not exist yet.
        let props_path = self.content_path(&id, "properties");
        let mut staged = NamedTempFile::new_in(&parent)
            .map_err(|e| ProxyError::io(format!("staging properties in {}", parent.display()), e))?;
        staged
            .write_all(&serde_json::to_vec_pretty(&blob)?)
            .map_err(|e| ProxyError::io(format!("writing properties of {}", id), e))?;
        staged.persist(&props_path).map_err(|e| ProxyError::BlobCommit {
            blob_id: id.clone(),
            reason: e.error.to_string(),
        })?;

        debug!("Committed blob {} ({} bytes)", blob.blob_ref, blob.size);
        Ok(blob)
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_temp(&self, algorithms: &[HashAlgorithm]) -> ProxyResult<TempBlobWriter> {
        TempBlobWriter::create_in(&self.tmp_dir(), algorithms).await
    }

    async fn commit(&self, temp: TempBlob) -> ProxyResult<Blob> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.commit_blocking(temp))
            .await
            .map_err(|e| ProxyError::Internal(format!("blob commit task failed: {e}")))?
    }

    async fn get(&self, blob_ref: &BlobRef) -> ProxyResult<Option<Blob>> {
        if blob_ref.store != self.name || !valid_blob_id(&blob_ref.id) {
            return Ok(None);
        }

        let bytes_path = self.content_path(&blob_ref.id, "bytes");
        if fs::metadata(&bytes_path).await.is_err() {
            return Ok(None);
        }
        let props_path = self.content_path(&blob_ref.id, "properties");
        let raw = match fs::read(&props_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ProxyError::io(format!("reading {}", props_path.display()), e)),
        };

        let mut blob: Blob = serde_json::from_slice(&raw)?;
        blob.path = bytes_path;
        Ok(Some(blob))
    }
}

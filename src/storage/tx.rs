//! Transactional metadata engine
//!
//! Each bucket's metadata lives on disk as a JSON snapshot
//! (`<root>/<bucket>.json`) guarded by an OS file lock on `<bucket>.lock`.
//! The lock file also carries a generation counter that every committed
//! unit of work bumps, so an engine can tell when another process changed
//! the snapshot and reload it before trusting its in-memory copy.
//!
//! A unit of work holds the bucket's in-process write lock and the
//! exclusive file lock for its whole duration. It runs against a
//! copy-on-write view of the state and, on success, bumps the generation and
//! writes the snapshot (temp file + rename) before publishing the copy. Any
//! error leaves both the in-memory state and the snapshot untouched.
//!
//! Because of that, [`StorageTx::component_entry`] is an atomic
//! insert-or-return-existing across processes: two first-time creators of
//! the same identity serialize and the second one sees the first one's
//! component.

use crate::error::{ProxyError, ProxyResult};
use crate::kind::AssetKind;
use crate::storage::blob::BlobStore;
use crate::storage::hash::HashAlgorithm;
use crate::storage::model::{Asset, Blob, BlobRef, Bucket, Component, PackageIdentity};
use fs4::FileExt;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

const SNAPSHOT_VERSION: u32 = 1;

/// On-disk form of a bucket
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    components: Vec<Component>,
    assets: Vec<Asset>,
}

/// In-memory form of a bucket, with the unique indexes
#[derive(Debug, Default, Clone)]
struct BucketState {
    components: BTreeMap<Uuid, Component>,
    identities: HashMap<PackageIdentity, Uuid>,
    assets: BTreeMap<String, Asset>,
}

impl BucketState {
    fn from_snapshot(snapshot: Snapshot, path: &Path) -> ProxyResult<Self> {
        let corrupt = |reason: String| ProxyError::MetadataCorrupt {
            path: path.to_path_buf(),
            reason,
        };

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(corrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let mut state = Self::default();
        for component in snapshot.components {
            if state
                .identities
                .insert(component.identity.clone(), component.id)
                .is_some()
            {
                return Err(corrupt(format!(
                    "duplicate component {}",
                    component.identity
                )));
            }
            state.components.insert(component.id, component);
        }
        for asset in snapshot.assets {
            if state.assets.contains_key(&asset.name) {
                return Err(corrupt(format!("duplicate asset {}", asset.name)));
            }
            state.assets.insert(asset.name.clone(), asset);
        }
        Ok(state)
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            components: self.components.values().cloned().collect(),
            assets: self.assets.values().cloned().collect(),
        }
    }
}

/// View of one bucket inside a unit of work. Lookups read the shared
/// state; the first mutation takes a private copy.
pub struct StorageTx<'a> {
    bucket: &'a Bucket,
    state: Cow<'a, BucketState>,
    attached: Vec<BlobRef>,
    dirty: bool,
}

impl<'a> StorageTx<'a> {
    fn new(bucket: &'a Bucket, state: &'a BucketState) -> Self {
        Self {
            bucket,
            state: Cow::Borrowed(state),
            attached: Vec::new(),
            dirty: false,
        }
    }

    pub fn bucket(&self) -> &Bucket {
        self.bucket
    }

    /// Exact-name lookup
    pub fn find_asset(&self, name: &str) -> Option<&Asset> {
        self.state.assets.get(name)
    }

    /// Exact composite-key lookup
    pub fn find_component(&self, identity: &PackageIdentity) -> Option<&Component> {
        self.state
            .identities
            .get(identity)
            .and_then(|id| self.state.components.get(id))
    }

    pub fn component(&self, id: Uuid) -> Option<&Component> {
        self.state.components.get(&id)
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.state.assets.values()
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.state.components.values()
    }

    /// Insert-or-return-existing keyed by identity. The second element is
    /// `true` when the component was created by this call.
    pub fn component_entry(&mut self, identity: &PackageIdentity) -> (Component, bool) {
        if let Some(existing) = self.find_component(identity) {
            return (existing.clone(), false);
        }

        let component = Component::new(identity.clone());
        let state = self.state.to_mut();
        state.identities.insert(identity.clone(), component.id);
        state.components.insert(component.id, component.clone());
        self.dirty = true;
        (component, true)
    }

    /// Existing asset by name, or a new unsaved one tagged with `kind`.
    /// The new asset only becomes visible once saved with a blob.
    pub fn asset_entry(
        &self,
        name: &str,
        kind: AssetKind,
        component: Option<Uuid>,
    ) -> (Asset, bool) {
        match self.find_asset(name) {
            Some(existing) => (existing.clone(), false),
            None => (Asset::new(name, kind, component), true),
        }
    }

    /// Point `asset` at a committed blob. Fails without touching the asset
    /// if a required digest is missing.
    pub fn set_blob(
        &mut self,
        asset: &mut Asset,
        blob: &Blob,
        required: &[HashAlgorithm],
        content_type: &str,
    ) -> ProxyResult<()> {
        for algorithm in required {
            if !blob.hashes.contains_key(algorithm) {
                return Err(ProxyError::MissingDigest {
                    algorithm: algorithm.to_string(),
                });
            }
        }

        asset.blob_ref = Some(blob.blob_ref.clone());
        asset.size = Some(blob.size);
        asset.checksums = blob
            .hashes
            .iter()
            .filter(|(algorithm, _)| required.contains(algorithm))
            .map(|(algorithm, digest)| (*algorithm, digest.clone()))
            .collect();
        asset.content_type = Some(content_type.to_string());
        self.attached.push(blob.blob_ref.clone());
        Ok(())
    }

    /// Insert or replace an asset by name. The asset must point at a blob
    /// attached in this unit of work or at the blob it already had.
    pub fn save_asset(&mut self, asset: &Asset) -> ProxyResult<()> {
        let blob_ref = asset
            .blob_ref
            .as_ref()
            .ok_or_else(|| ProxyError::AssetWithoutBlob(asset.name.clone()))?;
        let stored = self
            .find_asset(&asset.name)
            .and_then(|existing| existing.blob_ref.as_ref());
        if !self.attached.contains(blob_ref) && stored != Some(blob_ref) {
            return Err(ProxyError::BlobNotFound(blob_ref.to_string()));
        }
        if let Some(component) = asset.component {
            if !self.state.components.contains_key(&component) {
                return Err(ProxyError::Internal(format!(
                    "asset {} references unknown component {}",
                    asset.name, component
                )));
            }
        }

        self.state
            .to_mut()
            .assets
            .insert(asset.name.clone(), asset.clone());
        self.dirty = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Hold on `<bucket>.lock`, released when dropped
struct BucketLock {
    file: std::fs::File,
    path: PathBuf,
    generation: u64,
}

impl BucketLock {
    async fn acquire(path: PathBuf, mode: LockMode) -> ProxyResult<Self> {
        tokio::task::spawn_blocking(move || Self::acquire_blocking(path, mode))
            .await
            .map_err(|e| ProxyError::Internal(format!("bucket lock task failed: {e}")))?
    }

    fn acquire_blocking(path: PathBuf, mode: LockMode) -> ProxyResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProxyError::io(format!("creating {}", parent.display()), e))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ProxyError::io(format!("opening {}", path.display()), e))?;

        let locked = match mode {
            LockMode::Shared => file.lock_shared(),
            LockMode::Exclusive => file.lock_exclusive(),
        };
        locked.map_err(|e| ProxyError::io(format!("locking {}", path.display()), e))?;

        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .map_err(|e| ProxyError::io(format!("reading {}", path.display()), e))?;
        let generation = match raw.trim() {
            "" => 0,
            value => value.parse().map_err(|_| ProxyError::MetadataCorrupt {
                path: path.clone(),
                reason: format!("invalid generation {value:?}"),
            })?,
        };

        Ok(Self {
            file,
            path,
            generation,
        })
    }

    /// Record one more committed unit of work. Runs before the snapshot is
    /// replaced, so a crash in between only costs readers a reload.
    async fn advance(mut self) -> ProxyResult<Self> {
        tokio::task::spawn_blocking(move || -> ProxyResult<Self> {
            let next = self.generation + 1;
            write_generation(&mut self.file, next)
                .map_err(|e| ProxyError::io(format!("writing {}", self.path.display()), e))?;
            self.generation = next;
            Ok(self)
        })
        .await
        .map_err(|e| ProxyError::Internal(format!("bucket lock task failed: {e}")))?
    }
}

fn write_generation(file: &mut std::fs::File, generation: u64) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(generation.to_string().as_bytes())?;
    file.sync_all()
}

/// In-process copy of a bucket and the generation it was read at
#[derive(Debug, Default)]
struct CachedBucket {
    state: BucketState,
    generation: Option<u64>,
}

/// Request-scoped atomic read/modify/write over bucket metadata
pub struct MetadataEngine {
    root: PathBuf,
    blobs: Arc<dyn BlobStore>,
    buckets: Mutex<HashMap<String, Arc<RwLock<CachedBucket>>>>,
}

impl MetadataEngine {
    pub fn new(root: impl Into<PathBuf>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            root: root.into(),
            blobs,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    fn snapshot_path(&self, bucket: &Bucket) -> PathBuf {
        self.root.join(format!("{}.json", bucket.name))
    }

    fn lock_path(&self, bucket: &Bucket) -> PathBuf {
        self.root.join(format!("{}.lock", bucket.name))
    }

    async fn cached(&self, bucket: &Bucket) -> Arc<RwLock<CachedBucket>> {
        let mut buckets = self.buckets.lock().await;
        Arc::clone(buckets.entry(bucket.name.clone()).or_default())
    }

    /// Reload the snapshot if another engine committed since it was read
    async fn refresh(&self, bucket: &Bucket, cached: &mut CachedBucket, generation: u64) -> ProxyResult<()> {
        if cached.generation == Some(generation) {
            return Ok(());
        }
        cached.state = self.load_snapshot(bucket).await?;
        cached.generation = Some(generation);
        Ok(())
    }

    async fn load_snapshot(&self, bucket: &Bucket) -> ProxyResult<BucketState> {
        let path = self.snapshot_path(bucket);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BucketState::default()),
            Err(e) => return Err(ProxyError::io(format!("reading {}", path.display()), e)),
        };
        let snapshot: Snapshot =
            serde_json::from_slice(&raw).map_err(|e| ProxyError::MetadataCorrupt {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        debug!(
            "Loaded bucket {}: {} components, {} assets",
            bucket.name,
            snapshot.components.len(),
            snapshot.assets.len()
        );
        BucketState::from_snapshot(snapshot, &path)
    }

    /// Run read-only `work` against `bucket` without copying its state
    pub async fn read<T, F>(&self, bucket: &Bucket, work: F) -> ProxyResult<T>
    where
        F: FnOnce(&StorageTx<'_>) -> ProxyResult<T>,
    {
        let cached = self.cached(bucket).await;
        {
            let guard = cached.read().await;
            let lock = BucketLock::acquire(self.lock_path(bucket), LockMode::Shared).await?;
            if guard.generation == Some(lock.generation) {
                return work(&StorageTx::new(bucket, &guard.state));
            }
        }

        let mut guard = cached.write().await;
        let lock = BucketLock::acquire(self.lock_path(bucket), LockMode::Shared).await?;
        self.refresh(bucket, &mut guard, lock.generation).await?;
        let guard = guard.downgrade();
        let value = work(&StorageTx::new(bucket, &guard.state));
        drop(lock);
        value
    }

    /// Run `work` as one unit of work against `bucket`. All of its writes
    /// become visible together, or none do.
    pub async fn transact<T, F>(&self, bucket: &Bucket, work: F) -> ProxyResult<T>
    where
        F: FnOnce(&mut StorageTx<'_>) -> ProxyResult<T>,
    {
        let cached = self.cached(bucket).await;
        let mut guard = cached.write().await;
        let lock = BucketLock::acquire(self.lock_path(bucket), LockMode::Exclusive).await?;
        self.refresh(bucket, &mut guard, lock.generation).await?;

        let mut tx = StorageTx::new(bucket, &guard.state);
        let value = work(&mut tx)?;

        let StorageTx { state, dirty, .. } = tx;
        if dirty {
            let working = state.into_owned();
            let lock = lock.advance().await?;
            self.write_snapshot(bucket, &working).await?;
            guard.state = working;
            guard.generation = Some(lock.generation);
        }
        Ok(value)
    }

    async fn write_snapshot(&self, bucket: &Bucket, state: &BucketState) -> ProxyResult<()> {
        let path = self.snapshot_path(bucket);
        let staged = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(&state.to_snapshot())?;

        fs::write(&staged, content)
            .await
            .map_err(|e| ProxyError::io(format!("writing {}", staged.display()), e))?;
        fs::rename(&staged, &path)
            .await
            .map_err(|e| ProxyError::io(format!("renaming {}", staged.display()), e))?;
        Ok(())
    }
}

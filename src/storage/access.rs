//! Get-or-create and lookup operations over components and assets
//!
//! The `tx`-taking methods are building blocks meant to run inside one
//! [`MetadataEngine::transact`] call; the async methods each run a whole
//! unit of work. Blobs are committed before the unit of work that attaches
//! them, so no file I/O happens while the bucket is locked.

use crate::content::{etag_from_hashes, Content, ContentAttributes};
use crate::error::{ProxyError, ProxyResult};
use crate::kind::AssetKind;
use crate::storage::blob::{TempBlob, TempBlobWriter};
use crate::storage::hash::HashAlgorithm;
use crate::storage::model::{Asset, Blob, Bucket, CacheInfo, Component, PackageIdentity};
use crate::storage::tx::{MetadataEngine, StorageTx};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

/// Metadata and blob persistence for one proxy
pub struct MetadataStore {
    engine: MetadataEngine,
    algorithms: Vec<HashAlgorithm>,
}

impl MetadataStore {
    /// `algorithms` are the digests every saved blob must carry
    pub fn new(engine: MetadataEngine, algorithms: Vec<HashAlgorithm>) -> Self {
        Self { engine, algorithms }
    }

    pub fn engine(&self) -> &MetadataEngine {
        &self.engine
    }

    pub fn hash_algorithms(&self) -> &[HashAlgorithm] {
        &self.algorithms
    }

    /// Stage bytes with the configured digests
    pub async fn create_temp_blob(&self) -> ProxyResult<TempBlobWriter> {
        self.engine.blobs().create_temp(&self.algorithms).await
    }

    /// Commit a staged blob that carries every configured digest
    pub async fn commit_blob(&self, temp: TempBlob) -> ProxyResult<Blob> {
        for algorithm in &self.algorithms {
            if !temp.hashes().contains_key(algorithm) {
                return Err(ProxyError::MissingDigest {
                    algorithm: algorithm.to_string(),
                });
            }
        }
        self.engine.blobs().commit(temp).await
    }

    /// Find an asset by its name; a miss is `None`
    pub fn find_asset(&self, tx: &StorageTx<'_>, name: &str) -> Option<Asset> {
        tx.find_asset(name).cloned()
    }

    /// Find a component by (group, name, version); a miss is `None`
    pub fn find_component(&self, tx: &StorageTx<'_>, identity: &PackageIdentity) -> Option<Component> {
        tx.find_component(identity).cloned()
    }

    /// Existing asset, or a new one tagged with `kind`
    pub fn get_or_create_asset(
        &self,
        tx: &StorageTx<'_>,
        name: &str,
        kind: AssetKind,
        component: Option<Uuid>,
    ) -> Asset {
        let (asset, created) = tx.asset_entry(name, kind, component);
        if created {
            debug!("Creating asset {} ({})", name, kind);
        }
        asset
    }

    /// Existing component, or a new one saved before anything is attached
    pub fn get_or_create_component(&self, tx: &mut StorageTx<'_>, identity: &PackageIdentity) -> Component {
        let (component, created) = tx.component_entry(identity);
        if created {
            debug!("Creating component {}", identity);
        }
        component
    }

    /// Bind `blob` to `asset`, save the asset, and describe the result
    pub fn save_asset_content(
        &self,
        tx: &mut StorageTx<'_>,
        mut asset: Asset,
        blob: &Blob,
        content_type: &str,
        attributes: &ContentAttributes,
    ) -> ProxyResult<Content> {
        debug!("Saving asset {}", asset.name);

        let last_modified = attributes
            .last_modified
            .or(asset.last_modified)
            .unwrap_or_else(Utc::now);
        asset.last_modified = Some(last_modified);
        if let Some(info) = &attributes.cache_info {
            asset.cache_info = Some(info.clone());
        }

        tx.set_blob(&mut asset, blob, &self.algorithms, content_type)?;
        tx.save_asset(&asset)?;
        self.to_content(&asset, blob)
    }

    /// Pair a blob's bytes with the asset's content type and checksums
    pub fn to_content(&self, asset: &Asset, blob: &Blob) -> ProxyResult<Content> {
        let content_type = asset
            .content_type
            .clone()
            .ok_or_else(|| ProxyError::AssetWithoutContentType(asset.name.clone()))?;

        let hashes = asset
            .checksums
            .iter()
            .filter(|(algorithm, _)| self.algorithms.contains(algorithm))
            .map(|(algorithm, digest)| (*algorithm, digest.clone()))
            .collect();

        let attributes = ContentAttributes {
            asset_name: Some(asset.name.clone()),
            etag: etag_from_hashes(&hashes),
            hashes,
            last_modified: asset.last_modified,
            cache_info: asset.cache_info.clone(),
        };
        Ok(Content::from_blob(blob, content_type, attributes))
    }

    /// Stored content of an asset, or `None` when it is not cached
    pub async fn get_asset_content(&self, bucket: &Bucket, name: &str) -> ProxyResult<Option<Content>> {
        let Some(asset) = self
            .engine
            .read(bucket, |tx| Ok(self.find_asset(tx, name)))
            .await?
        else {
            return Ok(None);
        };

        let blob_ref = asset
            .blob_ref
            .as_ref()
            .ok_or_else(|| ProxyError::AssetWithoutBlob(asset.name.clone()))?;
        let blob = self
            .engine
            .blobs()
            .get(blob_ref)
            .await?
            .ok_or_else(|| ProxyError::BlobNotFound(blob_ref.to_string()))?;
        self.to_content(&asset, &blob).map(Some)
    }

    /// Asset-only persistence for listings
    pub async fn store_asset(
        &self,
        bucket: &Bucket,
        name: &str,
        kind: AssetKind,
        temp: TempBlob,
        content_type: &str,
        attributes: &ContentAttributes,
    ) -> ProxyResult<Content> {
        let blob = self.commit_blob(temp).await?;
        self.engine
            .transact(bucket, |tx| {
                let asset = self.get_or_create_asset(tx, name, kind, None);
                self.save_asset_content(tx, asset, &blob, content_type, attributes)
            })
            .await
    }

    /// Component + asset persistence for versioned metadata and artifacts
    #[allow(clippy::too_many_arguments)]
    pub async fn store_component(
        &self,
        bucket: &Bucket,
        identity: &PackageIdentity,
        name: &str,
        kind: AssetKind,
        temp: TempBlob,
        content_type: &str,
        attributes: &ContentAttributes,
    ) -> ProxyResult<Content> {
        let blob = self.commit_blob(temp).await?;
        self.engine
            .transact(bucket, |tx| {
                let component = self.get_or_create_component(tx, identity);
                let asset = self.get_or_create_asset(tx, name, kind, Some(component.id));
                self.save_asset_content(tx, asset, &blob, content_type, attributes)
            })
            .await
    }

    /// Metadata-only freshness update. Returns `false` when the asset no
    /// longer exists.
    pub async fn set_cache_info(&self, bucket: &Bucket, name: &str, cache_info: CacheInfo) -> ProxyResult<bool> {
        self.engine
            .transact(bucket, |tx| {
                let Some(mut asset) = self.find_asset(tx, name) else {
                    debug!("Attempting to set cache info for non-existent asset {}", name);
                    return Ok(false);
                };
                debug!("Updating cache info of {} to {:?}", name, cache_info);
                asset.cache_info = Some(cache_info);
                tx.save_asset(&asset)?;
                Ok(true)
            })
            .await
    }

    /// Component lookup as its own unit of work
    pub async fn load_component(&self, bucket: &Bucket, identity: &PackageIdentity) -> ProxyResult<Option<Component>> {
        self.engine
            .read(bucket, |tx| Ok(self.find_component(tx, identity)))
            .await
    }

    /// Get-or-create of a component as its own unit of work
    pub async fn ensure_component(&self, bucket: &Bucket, identity: &PackageIdentity) -> ProxyResult<Component> {
        self.engine
            .transact(bucket, |tx| Ok(self.get_or_create_component(tx, identity)))
            .await
    }

    pub async fn list_assets(&self, bucket: &Bucket) -> ProxyResult<Vec<Asset>> {
        self.engine
            .read(bucket, |tx| Ok(tx.assets().cloned().collect()))
            .await
    }

    pub async fn list_components(&self, bucket: &Bucket) -> ProxyResult<Vec<Component>> {
        self.engine
            .read(bucket, |tx| Ok(tx.components().cloned().collect()))
            .await
    }
}

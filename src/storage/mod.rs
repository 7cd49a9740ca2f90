//! Persistence: content-addressed blobs plus per-bucket metadata
//!
//! Blobs are immutable files keyed by their sha256. Components and assets
//! live in a per-bucket snapshot that only changes through
//! [`MetadataEngine::transact`]. [`MetadataStore`] layers the get-or-create
//! and save-with-content operations the proxy needs on top.

pub mod access;
pub mod blob;
pub mod hash;
pub mod model;
pub mod tx;

pub use access::MetadataStore;
pub use blob::{BlobStore, FileBlobStore, TempBlob, TempBlobWriter};
pub use hash::{hash_bytes, HashAlgorithm, Hashes, MultiHasher, DEFAULT_HASH_ALGORITHMS};
pub use model::{Asset, Blob, BlobRef, Bucket, CacheInfo, Component, PackageIdentity};
pub use tx::{MetadataEngine, StorageTx};

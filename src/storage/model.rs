//! Metadata entities persisted per bucket

use crate::kind::AssetKind;
use crate::storage::hash::Hashes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Per-repository namespace owning components and assets
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bucket {
    pub name: String,
}

impl Bucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Natural key of a component
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub group: String,
    pub name: String,
    pub version: String,
}

impl PackageIdentity {
    pub fn new(group: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.group, self.name, self.version)
    }
}

/// Package-version unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub id: Uuid,
    #[serde(flatten)]
    pub identity: PackageIdentity,
    pub created_at: DateTime<Utc>,
}

impl Component {
    pub fn new(identity: PackageIdentity) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity,
            created_at: Utc::now(),
        }
    }
}

/// Pointer from an asset into the blob store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef {
    pub store: String,
    /// Sha256 hex of the content
    pub id: String,
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.store, self.id)
    }
}

/// Immutable stored payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    pub blob_ref: BlobRef,
    pub size: u64,
    pub hashes: Hashes,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Freshness metadata of a cached asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub last_verified: DateTime<Utc>,
    /// Upstream validator (ETag), if the upstream sent one
    pub validator: Option<String>,
}

impl CacheInfo {
    pub fn new(last_verified: DateTime<Utc>, validator: Option<String>) -> Self {
        Self {
            last_verified,
            validator,
        }
    }

    /// A negative max age never goes stale
    pub fn is_stale(&self, max_age_mins: i64, now: DateTime<Utc>) -> bool {
        if max_age_mins < 0 {
            return false;
        }
        self.last_verified + chrono::Duration::minutes(max_age_mins) < now
    }
}

/// Named stored resource within a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub name: String,
    pub kind: AssetKind,
    pub component: Option<Uuid>,
    pub blob_ref: Option<BlobRef>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
    #[serde(default)]
    pub checksums: Hashes,
    pub last_modified: Option<DateTime<Utc>>,
    pub cache_info: Option<CacheInfo>,
    pub created_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(name: impl Into<String>, kind: AssetKind, component: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            component,
            blob_ref: None,
            content_type: None,
            size: None,
            checksums: Hashes::new(),
            last_modified: None,
            cache_info: None,
            created_at: Utc::now(),
        }
    }
}

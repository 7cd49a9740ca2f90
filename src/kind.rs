//! Asset kinds and the per-kind dispatch table
//!
//! Every request is tagged with one [`AssetKind`]. All kind-dependent
//! behaviour (where the asset lives, whether a component is created, which
//! rewrite runs over the body, which max-age applies) is read from
//! [`AssetKind::policy`], so adding a kind is a compile error until it is
//! given a full row.

use crate::error::{ProxyError, ProxyResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Semantic role of a request/response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    /// Paged role search by owner and name
    Role,
    /// Paged version list of a role, addressed by numeric id
    RoleVersionList,
    /// Paged version list of a collection
    CollectionVersionList,
    /// Metadata of a single collection version
    CollectionVersion,
    /// Binary tarball download
    Artifact,
    /// API discovery endpoints, never cached
    ApiInternals,
}

/// How an asset name is derived from the matched route tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathScheme {
    /// `roles/{author}/{module}/page/{page}`
    RolePage,
    /// `roles/{id}/versions/page/{page}`
    RoleVersionsPage,
    /// `collections/{author}/{module}/versions/page/{page}`
    CollectionVersionsPage,
    /// `collections/{author}/{module}/versions/{version}`
    CollectionVersion,
    /// Request path without the leading slash
    Download,
}

/// Persistence strategy for a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Always fetched live, never persisted
    Uncached,
    /// Stored as a bare asset
    Asset(PathScheme),
    /// Stored as an asset attached to a (group, name, version) component
    Component(PathScheme),
}

/// Body rewrite strategy for a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// Bytes are served exactly as received
    PassThrough,
    /// `next_link` prefixed, `download_url` origin swapped
    PagedVersionList,
    /// Every occurrence of the upstream base URL replaced
    UpstreamUrl,
}

/// Which max-age setting governs staleness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Content,
    Metadata,
}

/// One row of the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindPolicy {
    pub storage: Storage,
    pub rewrite: Rewrite,
    pub freshness: Freshness,
}

impl AssetKind {
    /// All kinds, in routing order
    pub const ALL: [AssetKind; 6] = [
        Self::ApiInternals,
        Self::Role,
        Self::RoleVersionList,
        Self::CollectionVersionList,
        Self::CollectionVersion,
        Self::Artifact,
    ];

    /// The dispatch table
    pub fn policy(self) -> KindPolicy {
        match self {
            Self::Role => KindPolicy {
                storage: Storage::Asset(PathScheme::RolePage),
                rewrite: Rewrite::UpstreamUrl,
                freshness: Freshness::Metadata,
            },
            Self::RoleVersionList => KindPolicy {
                storage: Storage::Asset(PathScheme::RoleVersionsPage),
                rewrite: Rewrite::PagedVersionList,
                freshness: Freshness::Metadata,
            },
            Self::CollectionVersionList => KindPolicy {
                storage: Storage::Asset(PathScheme::CollectionVersionsPage),
                rewrite: Rewrite::UpstreamUrl,
                freshness: Freshness::Metadata,
            },
            Self::CollectionVersion => KindPolicy {
                storage: Storage::Component(PathScheme::CollectionVersion),
                rewrite: Rewrite::UpstreamUrl,
                freshness: Freshness::Metadata,
            },
            Self::Artifact => KindPolicy {
                storage: Storage::Component(PathScheme::Download),
                rewrite: Rewrite::PassThrough,
                freshness: Freshness::Content,
            },
            Self::ApiInternals => KindPolicy {
                storage: Storage::Uncached,
                rewrite: Rewrite::UpstreamUrl,
                freshness: Freshness::Metadata,
            },
        }
    }

    /// Whether responses of this kind are ever persisted
    pub fn is_cacheable(self) -> bool {
        !matches!(self.policy().storage, Storage::Uncached)
    }

    /// Stable tag written into asset metadata
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Role => "ROLE",
            Self::RoleVersionList => "ROLE_VERSION_LIST",
            Self::CollectionVersionList => "COLLECTION_VERSION_LIST",
            Self::CollectionVersion => "COLLECTION_VERSION",
            Self::Artifact => "ARTIFACT",
            Self::ApiInternals => "API_INTERNALS",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetKind {
    type Err = ProxyError;

    fn from_str(s: &str) -> ProxyResult<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProxyError::InvalidAssetKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_from_str() {
        for kind in AssetKind::ALL {
            assert_eq!(kind.as_str().parse::<AssetKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_tag_is_internal_error() {
        let err = "WHEEL".parse::<AssetKind>().unwrap_err();
        assert!(matches!(err, ProxyError::InvalidAssetKind(ref s) if s == "WHEEL"));
        assert!(err.is_internal());
    }

    #[test]
    fn serde_tag_matches_display() {
        let json = serde_json::to_string(&AssetKind::RoleVersionList).unwrap();
        assert_eq!(json, "\"ROLE_VERSION_LIST\"");
    }

    #[test]
    fn only_api_internals_is_uncached() {
        let uncached: Vec<_> = AssetKind::ALL
            .into_iter()
            .filter(|k| !k.is_cacheable())
            .collect();
        assert_eq!(uncached, vec![AssetKind::ApiInternals]);
    }

    #[test]
    fn artifacts_pass_through_and_create_components() {
        let policy = AssetKind::Artifact.policy();
        assert_eq!(policy.rewrite, Rewrite::PassThrough);
        assert_eq!(policy.storage, Storage::Component(PathScheme::Download));
        assert_eq!(policy.freshness, Freshness::Content);
    }

    #[test]
    fn listings_are_asset_only() {
        for kind in [
            AssetKind::Role,
            AssetKind::RoleVersionList,
            AssetKind::CollectionVersionList,
        ] {
            assert!(matches!(kind.policy().storage, Storage::Asset(_)));
        }
    }
}

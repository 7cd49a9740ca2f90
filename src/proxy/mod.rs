//! Fetch-through cache for one Galaxy proxy repository
//!
//! [`ProxyCache::get`] classifies a request, answers it from storage when
//! the stored copy is fresh, and otherwise fetches from the upstream,
//! rewrites the body for its kind, and stores it. Responses of kinds that
//! are never cached are rewritten into a staged file and served from there.

pub mod upstream;

pub use upstream::{Conditions, FetchOutcome, HttpUpstream, Upstream, UpstreamResponse};

use crate::config::Config;
use crate::content::{Content, ContentAttributes};
use crate::error::{ProxyError, ProxyResult};
use crate::kind::{AssetKind, Freshness, Storage};
use crate::repository::Repository;
use crate::rewrite::{chain_for, pipe};
use crate::route::{GalaxyRoutes, Origin, PathMatcher, Request, RouteMatch};
use crate::storage::{
    Bucket, CacheInfo, FileBlobStore, HashAlgorithm, MetadataEngine, MetadataStore,
};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tracing::{debug, info, warn};

/// How a served response was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Fresh stored copy, no upstream call
    Hit,
    /// Fetched and stored
    Miss,
    /// Stored copy confirmed by a conditional fetch
    Revalidated,
    /// Stored copy served because the upstream failed
    Stale,
    /// Fetched and served without storing
    Live,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Revalidated => "revalidated",
            Self::Stale => "stale",
            Self::Live => "live",
        };
        write!(f, "{}", s)
    }
}

/// Max ages in minutes; negative means never stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxAge {
    pub content: i64,
    pub metadata: i64,
}

impl Default for MaxAge {
    fn default() -> Self {
        Self {
            content: 1440,
            metadata: 1440,
        }
    }
}

impl MaxAge {
    pub fn for_kind(&self, kind: AssetKind) -> i64 {
        match kind.policy().freshness {
            Freshness::Content => self.content,
            Freshness::Metadata => self.metadata,
        }
    }
}

/// Orchestrates lookup, fetch, rewrite and storage for one repository
pub struct ProxyCache {
    repository: Repository,
    bucket: Bucket,
    router: Arc<dyn PathMatcher>,
    upstream: Arc<dyn Upstream>,
    store: MetadataStore,
    max_age: MaxAge,
}

impl ProxyCache {
    pub fn new(
        repository: Repository,
        router: Arc<dyn PathMatcher>,
        upstream: Arc<dyn Upstream>,
        store: MetadataStore,
    ) -> Self {
        Self {
            bucket: repository.bucket(),
            repository,
            router,
            upstream,
            store,
            max_age: MaxAge::default(),
        }
    }

    pub fn with_max_age(mut self, max_age: MaxAge) -> Self {
        self.max_age = max_age;
        self
    }

    /// Wire up file storage, Galaxy routes and the HTTP upstream from config
    pub fn from_config(config: &Config) -> ProxyResult<Self> {
        let repository = Repository::from_config(&config.repository)?;
        let root = &config.storage.root;

        let algorithms = config
            .storage
            .hash_algorithms
            .iter()
            .map(|name| name.parse::<HashAlgorithm>())
            .collect::<ProxyResult<Vec<_>>>()?;

        let blobs = Arc::new(FileBlobStore::new("default", root.join("blobs")));
        let engine = MetadataEngine::new(root.join("metadata"), blobs);
        let store = MetadataStore::new(engine, algorithms);
        let upstream = HttpUpstream::new(
            Duration::from_secs(config.proxy.timeout_secs),
            root.join("tmp"),
        );

        debug!(
            "Proxy {} -> {} (storage {})",
            repository.name,
            repository.upstream_url,
            root.display()
        );

        Ok(Self::new(repository, Arc::new(GalaxyRoutes), Arc::new(upstream), store).with_max_age(
            MaxAge {
                content: config.proxy.content_max_age,
                metadata: config.proxy.metadata_max_age,
            },
        ))
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Route a request; unmatched paths are client errors
    pub fn classify(&self, request: &Request) -> ProxyResult<RouteMatch> {
        let route = self
            .router
            .matches(request)
            .ok_or_else(|| ProxyError::NotFound(request.path.clone()))?;
        debug!("{} classified as {}", request, route.kind);
        Ok(route)
    }

    /// Asset name a route is stored under, `None` for uncached kinds
    pub fn asset_name(&self, route: &RouteMatch) -> ProxyResult<Option<String>> {
        match route.kind.policy().storage {
            Storage::Uncached => Ok(None),
            Storage::Asset(scheme) | Storage::Component(scheme) => route.asset_path(scheme).map(Some),
        }
    }

    /// Stored content for a route, regardless of freshness
    pub async fn lookup_cached(&self, route: &RouteMatch) -> ProxyResult<Option<Content>> {
        let Some(name) = self.asset_name(route)? else {
            return Ok(None);
        };
        self.store.get_asset_content(&self.bucket, &name).await
    }

    /// Rewrite an upstream body and persist it according to its kind
    pub async fn fetch_and_store(&self, route: &RouteMatch, response: UpstreamResponse) -> ProxyResult<Content> {
        let policy = route.kind.policy();
        let source = File::open(&response.body)
            .await
            .map_err(|e| ProxyError::io(format!("opening {}", response.body.display()), e))?;

        let mut writer = self.store.create_temp_blob().await?;
        let written = pipe(source, chain_for(policy.rewrite, &self.repository), &mut writer).await?;
        let temp = writer.finish().await?;
        debug!("Rewrote {} body ({} bytes)", route.kind, written);

        let attributes = ContentAttributes {
            last_modified: response.last_modified,
            cache_info: Some(CacheInfo::new(Utc::now(), response.etag.clone())),
            ..Default::default()
        };

        match policy.storage {
            Storage::Uncached => Ok(Content::staged(
                temp,
                response.content_type,
                response.last_modified,
            )),
            Storage::Asset(scheme) => {
                let name = route.asset_path(scheme)?;
                let content = self
                    .store
                    .store_asset(&self.bucket, &name, route.kind, temp, &response.content_type, &attributes)
                    .await?;
                info!("Stored {} {}", route.kind, name);
                Ok(content)
            }
            Storage::Component(scheme) => {
                let name = route.asset_path(scheme)?;
                let identity = route.identity()?;
                let content = self
                    .store
                    .store_component(
                        &self.bucket,
                        &identity,
                        &name,
                        route.kind,
                        temp,
                        &response.content_type,
                        &attributes,
                    )
                    .await?;
                info!("Stored {} {} for {}", route.kind, name, identity);
                Ok(content)
            }
        }
    }

    /// Record that the stored copy was confirmed current
    pub async fn revalidate(&self, content: &Content, cache_info: CacheInfo) -> ProxyResult<()> {
        let Some(name) = content.attributes.asset_name.as_deref() else {
            debug!("Content has no asset, nothing to revalidate");
            return Ok(());
        };
        self.store.set_cache_info(&self.bucket, name, cache_info).await?;
        Ok(())
    }

    /// Absolute upstream URL for a routed request
    pub fn upstream_url(&self, route: &RouteMatch, request: &Request) -> ProxyResult<String> {
        match route.origin {
            Origin::Galaxy => Ok(format!("{}{}", self.repository.upstream_url, request.relative_uri())),
            Origin::RoleArchive => {
                let path = route.token("path")?;
                let archive = path.strip_prefix("download/").unwrap_or(path);
                Ok(format!("{}/{}", self.repository.role_download_url, archive))
            }
        }
    }

    /// Serve a request, `None` when the upstream does not have it.
    ///
    /// An upstream `404`/`410` wins over a stale stored copy: content the
    /// upstream removed is reported missing rather than served from storage.
    /// Only transport errors and unexpected statuses fall back to the stale
    /// copy.
    pub async fn get(&self, request: &Request) -> ProxyResult<Option<Content>> {
        Ok(self.get_with_status(request).await?.map(|(content, _)| content))
    }

    /// Like [`get`](Self::get), also reporting where the content came from
    pub async fn get_with_status(&self, request: &Request) -> ProxyResult<Option<(Content, CacheStatus)>> {
        let route = self.classify(request)?;
        let now = Utc::now();
        let cached = self.lookup_cached(&route).await?;

        let max_age = self.max_age.for_kind(route.kind);
        match &cached {
            Some(content) if !is_stale(content, max_age, now) => {
                debug!("Cache hit for {}", request);
                return Ok(cached.map(|content| (content, CacheStatus::Hit)));
            }
            Some(_) => debug!("Stored copy of {} is stale", request),
            None => {}
        }

        let conditions = cached.as_ref().map(conditions_for).unwrap_or_default();
        let url = self.upstream_url(&route, request)?;

        match self.upstream.fetch(&url, &conditions).await {
            Ok(FetchOutcome::Fetched(response)) => {
                let status = if route.kind.is_cacheable() {
                    CacheStatus::Miss
                } else {
                    CacheStatus::Live
                };
                let content = self.fetch_and_store(&route, response).await?;
                Ok(Some((content, status)))
            }
            Ok(FetchOutcome::NotModified) => {
                let Some(mut content) = cached else {
                    return Err(ProxyError::upstream(url, "not modified, but nothing is cached"));
                };
                let cache_info = CacheInfo::new(now, conditions.etag);
                self.revalidate(&content, cache_info.clone()).await?;
                content.attributes.cache_info = Some(cache_info);
                debug!("Revalidated {}", request);
                Ok(Some((content, CacheStatus::Revalidated)))
            }
            Ok(FetchOutcome::Missing) => {
                debug!("Upstream has no {}", url);
                Ok(None)
            }
            Err(e) => match cached {
                Some(content) if e.is_retryable() => {
                    warn!("Serving stale {} after upstream failure: {}", request, e);
                    Ok(Some((content, CacheStatus::Stale)))
                }
                _ => Err(e),
            },
        }
    }
}

fn is_stale(content: &Content, max_age_mins: i64, now: DateTime<Utc>) -> bool {
    content
        .attributes
        .cache_info
        .as_ref()
        .map_or(true, |info| info.is_stale(max_age_mins, now))
}

fn conditions_for(content: &Content) -> Conditions {
    Conditions {
        etag: content
            .attributes
            .cache_info
            .as_ref()
            .and_then(|info| info.validator.clone()),
        last_modified: content.attributes.last_modified,
    }
}

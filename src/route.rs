//! Request routing
//!
//! Maps a client request onto an [`AssetKind`] plus the tokens captured from
//! its path and query. The proxy only consumes the [`PathMatcher`] trait;
//! [`GalaxyRoutes`] is the matcher for the Galaxy v1/v2/v3 layout.

use crate::error::{ProxyError, ProxyResult};
use crate::kind::{AssetKind, PathScheme};
use crate::storage::PackageIdentity;
use std::collections::BTreeMap;
use std::fmt;

const TARBALL_SUFFIX: &str = ".tar.gz";

/// A client request, reduced to what routing and upstream fetch need
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Absolute path, always starting with `/`
    pub path: String,
    /// Query parameters in arrival order, undecoded
    pub params: Vec<(String, String)>,
}

impl Request {
    /// Create a request without query parameters
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    /// Parse `"/path?a=1&b=2"`
    pub fn parse(uri: &str) -> ProxyResult<Self> {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };

        if !path.starts_with('/') {
            return Err(ProxyError::BadRequest(format!(
                "path must start with '/': {}",
                uri
            )));
        }

        let params = query
            .unwrap_or_default()
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .collect();

        Ok(Self {
            path: path.to_string(),
            params,
        })
    }

    /// First value of a query parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Relative URI used against the upstream: path without the leading
    /// slash, plus the query string when there is one
    pub fn relative_uri(&self) -> String {
        let mut uri = self.path.trim_start_matches('/').to_string();
        if !self.params.is_empty() {
            uri.push('?');
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            uri.push_str(&query.join("&"));
        }
        uri
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.relative_uri())
    }
}

/// Which upstream a matched request is fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The configured Galaxy server
    Galaxy,
    /// Role source archives, served by the role download origin
    RoleArchive,
}

/// Result of routing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub kind: AssetKind,
    pub origin: Origin,
    tokens: BTreeMap<&'static str, String>,
}

impl RouteMatch {
    pub fn new(kind: AssetKind) -> Self {
        Self {
            kind,
            origin: Origin::Galaxy,
            tokens: BTreeMap::new(),
        }
    }

    fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.tokens.insert(name, value.into());
        self
    }

    fn from_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Captured token, or an internal error if the route did not capture it
    pub fn token(&self, name: &str) -> ProxyResult<&str> {
        self.tokens
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ProxyError::MissingToken {
                kind: self.kind.to_string(),
                token: name.to_string(),
            })
    }

    /// Asset name for this match under the given scheme
    pub fn asset_path(&self, scheme: PathScheme) -> ProxyResult<String> {
        let path = match scheme {
            PathScheme::RolePage => format!(
                "roles/{}/{}/page/{}",
                self.token("author")?,
                self.token("module")?,
                self.token("page")?
            ),
            PathScheme::RoleVersionsPage => format!(
                "roles/{}/versions/page/{}",
                self.token("id")?,
                self.token("page")?
            ),
            PathScheme::CollectionVersionsPage => format!(
                "collections/{}/{}/versions/page/{}",
                self.token("author")?,
                self.token("module")?,
                self.token("page")?
            ),
            PathScheme::CollectionVersion => format!(
                "collections/{}/{}/versions/{}",
                self.token("author")?,
                self.token("module")?,
                self.token("version")?
            ),
            PathScheme::Download => self.token("path")?.to_string(),
        };
        Ok(path)
    }

    /// Package identity captured by versioned routes
    pub fn identity(&self) -> ProxyResult<PackageIdentity> {
        Ok(PackageIdentity::new(
            self.token("author")?,
            self.token("module")?,
            self.token("version")?,
        ))
    }
}

/// Classifies requests into asset kinds
pub trait PathMatcher: Send + Sync {
    /// `None` when no route matches the request
    fn matches(&self, request: &Request) -> Option<RouteMatch>;
}

/// Routes of the Galaxy API as used by `ansible-galaxy`
#[derive(Debug, Default, Clone, Copy)]
pub struct GalaxyRoutes;

impl PathMatcher for GalaxyRoutes {
    fn matches(&self, request: &Request) -> Option<RouteMatch> {
        let mut segments: Vec<&str> = request.path.trim_start_matches('/').split('/').collect();
        if segments.last() == Some(&"") {
            segments.pop();
        }
        if segments.iter().any(|s| !segment_ok(s)) {
            return None;
        }

        let page = request.param("page").unwrap_or("1");
        if !is_number(page) {
            return None;
        }

        match segments.as_slice() {
            ["api"] | ["api", "v1" | "v2" | "v3"] => Some(RouteMatch::new(AssetKind::ApiInternals)),
            ["api", "v1", "roles"] => {
                let author = request.param("owner__username").filter(|s| segment_ok(s))?;
                let module = request.param("name").filter(|s| segment_ok(s))?;
                Some(
                    RouteMatch::new(AssetKind::Role)
                        .with("author", author)
                        .with("module", module)
                        .with("page", page),
                )
            }
            ["api", "v1", "roles", id, "versions"] if is_number(id) => Some(
                RouteMatch::new(AssetKind::RoleVersionList)
                    .with("id", *id)
                    .with("page", page),
            ),
            ["api", "v2" | "v3", "collections", author, module, "versions"] => Some(
                RouteMatch::new(AssetKind::CollectionVersionList)
                    .with("author", *author)
                    .with("module", *module)
                    .with("page", page),
            ),
            ["api", "v2" | "v3", "collections", author, module, "versions", version] => Some(
                RouteMatch::new(AssetKind::CollectionVersion)
                    .with("author", *author)
                    .with("module", *module)
                    .with("version", *version),
            ),
            ["download", file] => {
                let stem = file.strip_suffix(TARBALL_SUFFIX)?;
                let mut parts = stem.splitn(3, '-');
                let author = parts.next().filter(|s| !s.is_empty())?;
                let module = parts.next().filter(|s| !s.is_empty())?;
                let version = parts.next().filter(|s| !s.is_empty())?;
                Some(
                    RouteMatch::new(AssetKind::Artifact)
                        .with("author", author)
                        .with("module", module)
                        .with("version", version)
                        .with("path", format!("download/{}", file)),
                )
            }
            ["download", owner, repo, "archive", file] => {
                let version = file.strip_suffix(TARBALL_SUFFIX).filter(|s| !s.is_empty())?;
                Some(
                    RouteMatch::new(AssetKind::Artifact)
                        .from_origin(Origin::RoleArchive)
                        .with("author", *owner)
                        .with("module", *repo)
                        .with("version", version)
                        .with("path", format!("download/{}/{}/archive/{}", owner, repo, file)),
                )
            }
            _ => None,
        }
    }
}

fn segment_ok(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['\\', '/'])
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(uri: &str) -> Option<RouteMatch> {
        GalaxyRoutes.matches(&Request::parse(uri).unwrap())
    }

    #[test]
    fn parse_splits_query_in_order() {
        let req = Request::parse("/api/v1/roles/?owner__username=geerlingguy&name=docker").unwrap();
        assert_eq!(req.path, "/api/v1/roles/");
        assert_eq!(req.param("owner__username"), Some("geerlingguy"));
        assert_eq!(
            req.relative_uri(),
            "api/v1/roles/?owner__username=geerlingguy&name=docker"
        );
    }

    #[test]
    fn relative_uri_without_query_has_no_question_mark() {
        let req = Request::new("/api/v2/collections/community/general/versions/");
        assert_eq!(
            req.relative_uri(),
            "api/v2/collections/community/general/versions/"
        );
    }

    #[test]
    fn parse_rejects_relative_path() {
        assert!(matches!(
            Request::parse("api/"),
            Err(ProxyError::BadRequest(_))
        ));
    }

    #[test]
    fn api_roots_are_internal() {
        for uri in ["/api/", "/api", "/api/v1/", "/api/v3/"] {
            assert_eq!(route(uri).unwrap().kind, AssetKind::ApiInternals, "{}", uri);
        }
    }

    #[test]
    fn role_search_needs_owner_and_name() {
        assert!(route("/api/v1/roles/?name=docker").is_none());
        let m = route("/api/v1/roles/?owner__username=geerlingguy&name=docker&page=3").unwrap();
        assert_eq!(m.kind, AssetKind::Role);
        assert_eq!(
            m.asset_path(PathScheme::RolePage).unwrap(),
            "roles/geerlingguy/docker/page/3"
        );
    }

    #[test]
    fn role_versions_default_to_first_page() {
        let m = route("/api/v1/roles/4711/versions/").unwrap();
        assert_eq!(m.kind, AssetKind::RoleVersionList);
        assert_eq!(
            m.asset_path(PathScheme::RoleVersionsPage).unwrap(),
            "roles/4711/versions/page/1"
        );
        assert!(route("/api/v1/roles/abc/versions/").is_none());
    }

    #[test]
    fn collection_version_carries_identity() {
        let m = route("/api/v3/collections/community/general/versions/8.1.0/").unwrap();
        assert_eq!(m.kind, AssetKind::CollectionVersion);
        let id = m.identity().unwrap();
        assert_eq!((id.group.as_str(), id.name.as_str(), id.version.as_str()), ("community", "general", "8.1.0"));
    }

    #[test]
    fn collection_tarball_splits_on_first_two_dashes() {
        let m = route("/download/community-general-8.1.0-rc.1.tar.gz").unwrap();
        assert_eq!(m.kind, AssetKind::Artifact);
        assert_eq!(m.origin, Origin::Galaxy);
        assert_eq!(m.identity().unwrap().version, "8.1.0-rc.1");
        assert_eq!(
            m.asset_path(PathScheme::Download).unwrap(),
            "download/community-general-8.1.0-rc.1.tar.gz"
        );
    }

    #[test]
    fn role_archive_uses_role_origin() {
        let m = route("/download/geerlingguy/ansible-role-docker/archive/7.0.1.tar.gz").unwrap();
        assert_eq!(m.kind, AssetKind::Artifact);
        assert_eq!(m.origin, Origin::RoleArchive);
        assert_eq!(m.identity().unwrap().name, "ansible-role-docker");
    }

    #[test]
    fn traversal_and_garbage_do_not_match() {
        assert!(route("/download/../etc/passwd").is_none());
        assert!(route("/api/v2/collections/a//versions/").is_none());
        assert!(route("/api/v1/roles/1/versions/?page=../../x").is_none());
        assert!(route("/index.html").is_none());
    }

    #[test]
    fn missing_token_is_internal() {
        let m = route("/api/").unwrap();
        let err = m.identity().unwrap_err();
        assert!(err.is_internal());
    }
}

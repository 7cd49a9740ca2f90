//! The proxy repository a cache serves

use crate::config::schema::RepositoryConfig;
use crate::error::{ProxyError, ProxyResult};
use crate::storage::Bucket;

/// Names and URLs of one proxy repository, normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Repository name, also the metadata bucket name
    pub name: String,
    /// Public base URL of this repository, no trailing slash
    pub url: String,
    /// Galaxy base URL, always ending in `/`
    pub upstream_url: String,
    /// Origin serving role source archives, no trailing slash
    pub role_download_url: String,
}

impl Repository {
    pub fn new(
        name: impl Into<String>,
        url: &str,
        upstream_url: &str,
        role_download_url: &str,
    ) -> ProxyResult<Self> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(ProxyError::InvalidUrl {
                url: name,
                reason: "repository name must be a single path segment".to_string(),
            });
        }

        let url = absolute(url)?.trim_end_matches('/').to_string();
        let upstream_url = format!("{}/", absolute(upstream_url)?.trim_end_matches('/'));
        let role_download_url = absolute(role_download_url)?.trim_end_matches('/').to_string();

        Ok(Self {
            name,
            url,
            upstream_url,
            role_download_url,
        })
    }

    pub fn from_config(config: &RepositoryConfig) -> ProxyResult<Self> {
        Self::new(
            config.name.clone(),
            &config.url,
            &config.upstream_url,
            &config.role_download_url,
        )
    }

    /// Path prefix under which clients reach this repository
    pub fn path_prefix(&self) -> String {
        format!("/repository/{}", self.name)
    }

    pub fn bucket(&self) -> Bucket {
        Bucket::new(self.name.clone())
    }
}

fn absolute(url: &str) -> ProxyResult<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ProxyError::InvalidUrl {
            url: url.to_string(),
            reason: "expected an http:// or https:// URL".to_string(),
        })?;
    if rest.trim_end_matches('/').is_empty() {
        return Err(ProxyError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

//! Fetching from the remote Galaxy server

use crate::error::{ProxyError, ProxyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{NamedTempFile, TempPath};
use tracing::debug;

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Validators for a conditional request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

/// A successful upstream response, body already on disk
#[derive(Debug)]
pub struct UpstreamResponse {
    /// Raw body, deleted when dropped
    pub body: TempPath,
    pub content_type: String,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(UpstreamResponse),
    /// The conditions matched; the cached copy is still current
    NotModified,
    /// The upstream has no such resource
    Missing,
}

/// Source of upstream responses
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, url: &str, conditions: &Conditions) -> ProxyResult<FetchOutcome>;
}

/// HTTP client for the real upstream
pub struct HttpUpstream {
    agent: ureq::Agent,
    tmp_dir: PathBuf,
}

impl HttpUpstream {
    /// Bodies are staged under `tmp_dir` before they are rewritten
    pub fn new(timeout: Duration, tmp_dir: impl Into<PathBuf>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            tmp_dir: tmp_dir.into(),
        }
    }

    fn fetch_blocking(
        agent: &ureq::Agent,
        tmp_dir: &Path,
        url: &str,
        conditions: &Conditions,
    ) -> ProxyResult<FetchOutcome> {
        let mut request = agent.get(url);
        if let Some(etag) = &conditions.etag {
            request = request.header("If-None-Match", etag.as_str());
        }
        if let Some(modified) = &conditions.last_modified {
            request = request.header("If-Modified-Since", modified.format(HTTP_DATE).to_string());
        }

        let response = request.call().map_err(|e| ProxyError::upstream(url, e))?;
        let status = response.status().as_u16();
        debug!("GET {} -> {}", url, status);

        match status {
            200..=299 => {}
            304 => return Ok(FetchOutcome::NotModified),
            404 | 410 => return Ok(FetchOutcome::Missing),
            _ => {
                return Err(ProxyError::UpstreamStatus {
                    url: url.to_string(),
                    status,
                })
            }
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header("Content-Type").unwrap_or_else(|| "application/octet-stream".to_string());
        let etag = header("ETag");
        let last_modified = header("Last-Modified").and_then(|v| parse_http_date(&v));

        std::fs::create_dir_all(tmp_dir)
            .map_err(|e| ProxyError::io(format!("creating {}", tmp_dir.display()), e))?;
        let mut staged =
            NamedTempFile::new_in(tmp_dir).map_err(|e| ProxyError::io("staging upstream body", e))?;
        let mut reader = response.into_body().into_reader();
        let size = io::copy(&mut reader, &mut staged).map_err(|e| ProxyError::upstream(url, e))?;
        debug!("Staged {} bytes from {}", size, url);

        Ok(FetchOutcome::Fetched(UpstreamResponse {
            body: staged.into_temp_path(),
            content_type,
            etag,
            last_modified,
        }))
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch(&self, url: &str, conditions: &Conditions) -> ProxyResult<FetchOutcome> {
        let agent = self.agent.clone();
        let tmp_dir = self.tmp_dir.clone();
        let url = url.to_string();
        let conditions = conditions.clone();

        tokio::task::spawn_blocking(move || Self::fetch_blocking(&agent, &tmp_dir, &url, &conditions))
            .await
            .map_err(|e| ProxyError::Internal(format!("upstream fetch task failed: {}", e)))?
    }
}

/// RFC 2822 / IMF-fixdate parse, `None` when malformed
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

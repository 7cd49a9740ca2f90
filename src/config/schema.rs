//! Configuration schema for galaxy-proxy
//!
//! Configuration is stored at `~/.config/galaxy-proxy/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// The proxied repository
    pub repository: RepositoryConfig,

    /// Blob and metadata storage
    pub storage: StorageConfig,

    /// Fetch and freshness settings
    pub proxy: ProxyConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Repository identity and URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Repository name, used as the storage bucket
    pub name: String,

    /// Public URL clients reach this repository at
    pub url: String,

    /// Galaxy server being proxied
    pub upstream_url: String,

    /// Origin of role source archives
    pub role_download_url: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: "ansible-proxy".to_string(),
            url: "http://localhost:8081/repository/ansible-proxy".to_string(),
            upstream_url: "https://galaxy.ansible.com/".to_string(),
            role_download_url: "https://github.com".to_string(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding blobs and metadata snapshots
    pub root: PathBuf,

    /// Digests recorded for every stored blob
    pub hash_algorithms: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("galaxy-proxy"),
            hash_algorithms: vec!["sha256".to_string(), "sha1".to_string()],
        }
    }
}

/// Proxy behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Minutes before a stored artifact is rechecked (negative = never)
    pub content_max_age: i64,

    /// Minutes before stored metadata is rechecked (negative = never)
    pub metadata_max_age: i64,

    /// Upstream request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            content_max_age: 1440,
            metadata_max_age: 1440,
            timeout_secs: 60,
        }
    }
}

//! Error types for galaxy-proxy
//!
//! All modules use `ProxyResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// All errors that can occur in galaxy-proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid repository URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    // Routing errors
    #[error("No route matches path: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Received an invalid asset kind: {0}")]
    InvalidAssetKind(String),

    #[error("Route for {kind} is missing token '{token}'")]
    MissingToken { kind: String, token: String },

    // Upstream errors
    #[error("Upstream request to {url} failed: {reason}")]
    Upstream { url: String, reason: String },

    #[error("Upstream returned status {status} for {url}")]
    UpstreamStatus { url: String, status: u16 },

    #[error("Upstream has no content for {0}")]
    UpstreamMissing(String),

    // Storage errors
    #[error("Temp blob is missing required {algorithm} digest")]
    MissingDigest { algorithm: String },

    #[error("Failed to commit blob {blob_id}: {reason}")]
    BlobCommit { blob_id: String, reason: String },

    #[error("Blob {0} not found in blob store")]
    BlobNotFound(String),

    #[error("Asset {0} has no blob attached")]
    AssetWithoutBlob(String),

    #[error("Asset {0} has no content type")]
    AssetWithoutContentType(String),

    #[error("Metadata snapshot {path} is corrupt: {reason}")]
    MetadataCorrupt { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an upstream transport error
    pub fn upstream(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Upstream {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::UpstreamStatus { .. })
    }

    /// Internal consistency errors, as opposed to bad client input
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::InvalidAssetKind(_)
                | Self::MissingToken { .. }
                | Self::AssetWithoutBlob(_)
                | Self::AssetWithoutContentType(_)
                | Self::MetadataCorrupt { .. }
                | Self::Internal(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NotFound(_) => Some("Paths look like /api/v2/collections/<ns>/<name>/versions/"),
            Self::ConfigInvalid { .. } => Some("Run: galaxy-proxy config init --force"),
            Self::InvalidUrl { .. } => Some("Check repository.url and repository.upstream_url"),
            Self::Upstream { .. } => Some("Check network access to repository.upstream_url"),
            Self::MetadataCorrupt { .. } => {
                Some("Move the metadata snapshot aside; it is rebuilt on the next fetch")
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProxyError::NotFound("/nope".to_string());
        assert!(err.to_string().contains("No route matches"));
    }

    #[test]
    fn error_hint() {
        let err = ProxyError::NotFound("/nope".to_string());
        assert!(err.hint().is_some());
        assert_eq!(ProxyError::Internal("x".into()).hint(), None);
    }

    #[test]
    fn error_retryable() {
        assert!(ProxyError::upstream("https://galaxy", "reset").is_retryable());
        assert!(!ProxyError::InvalidAssetKind("WHEEL".into()).is_retryable());
    }

    #[test]
    fn invalid_kind_is_internal_not_client() {
        assert!(ProxyError::InvalidAssetKind("WHEEL".into()).is_internal());
        assert!(!ProxyError::NotFound("/x".into()).is_internal());
        assert!(!ProxyError::BadRequest("x".into()).is_internal());
    }
}

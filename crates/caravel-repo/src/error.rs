//! Error types for repository synchronization

use thiserror::Error;

/// Repository operation errors
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RepoError {
    #[error("invalid repository URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP error fetching {url}: {status}")]
    Http { url: String, status: u16 },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("index not found at {url}")]
    IndexNotFound { url: String },

    #[error("index parse error: {message}")]
    IndexParse { message: String },

    #[error("OCI registry error: {message}")]
    Oci { message: String },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("catalog object not found: {id}")]
    CatalogNotFound { id: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        RepoError::Network {
            message: e.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        match self {
            RepoError::CatalogNotFound { .. } | RepoError::IndexNotFound { .. } => true,
            RepoError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

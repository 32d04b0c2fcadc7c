//! Error types for caravel-kube

use thiserror::Error;

/// Result type for cluster and executor operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur during cluster and deployment operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Target cluster is unknown or being removed
    #[error("cluster '{name}' not found")]
    ClusterNotFound { name: String },

    /// Deployed release has not materialized in the target cluster
    #[error("release '{name}' not found in namespace '{namespace}'")]
    ReleaseNotFound { name: String, namespace: String },

    /// Manifest document could not be parsed or resolved
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Staged package exceeds what a single Secret can carry
    #[error("package too large to stage ({size} bytes, max {max} bytes)")]
    PackageTooLarge { size: usize, max: usize },

    /// Kubeconfig material missing or unreadable
    #[error("kubeconfig for cluster '{cluster}' unavailable: {message}")]
    Kubeconfig { cluster: String, message: String },

    /// Operation not supported by this implementation
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            KubeError::ReleaseNotFound { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}

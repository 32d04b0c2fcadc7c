//! Error types for artifact storage

use thiserror::Error;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during artifact storage and package fetching
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Blob not found in the backend
    #[error("artifact '{key}' not found")]
    NotFound { key: String },

    /// Kubernetes API error (ConfigMap backend)
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Object store error (S3 backend)
    #[error("object store error: {message}")]
    ObjectStore { message: String },

    /// Package download failed
    #[error("package fetch failed for {location}: {message}")]
    Fetch { location: String, message: String },

    /// Downloaded bytes do not match the recorded digest
    #[error("digest mismatch for {key}: expected {expected}, got {actual}")]
    DigestMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// Version has neither a blob key nor a pull URL
    #[error("version '{name}' has no package source")]
    NoPackageSource { name: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Check whether this error means the blob does not exist, which the
    /// tiered store treats as a fallback signal rather than a failure.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound { .. } => true,
            StoreError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check for an already-exists conflict (idempotent-upload path).
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }
}

//! Error types for the controllers

use thiserror::Error;

/// Result type for reconcile operations
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors surfaced by reconcilers; the work queue turns them into
/// backoff-delayed retries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControllerError {
    #[error(transparent)]
    Kube(#[from] caravel_kube::KubeError),

    #[error(transparent)]
    Store(#[from] caravel_store::StoreError),

    #[error(transparent)]
    Repo(#[from] caravel_repo::RepoError),

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ControllerError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ControllerError::Api(kube::Error::Api(resp)) if resp.code == 409
        )
    }
}

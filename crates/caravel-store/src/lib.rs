//! Caravel Store - tiered artifact storage for chart packages and attachments
//!
//! Blobs are keyed by caller-chosen ids (catalog version names, generated
//! attachment ids) and written at most once; content behind a key is
//! immutable. Two backends are provided:
//! - **ConfigMap** (small-object): one ConfigMap per blob on the host
//!   cluster, the default when no object store is configured
//! - **S3** (large-object): any S3-compatible object store
//!
//! The [`TieredStore`] façade layers the two: reads try the large-object
//! backend first and fall back on not-found; writes and deletes prefer the
//! large-object backend when configured.

pub mod configmap;
pub mod error;
pub mod fetch;
pub mod mock;
pub mod s3;
pub mod tiered;

pub use configmap::ConfigMapStore;
pub use error::{Result, StoreError};
pub use fetch::{PackageFetcher, PackageResolver};
pub use mock::{MemoryStore, StoreCounts};
pub use s3::{S3Config, S3Store};
pub use tiered::TieredStore;

use async_trait::async_trait;
use bytes::Bytes;

/// Content-addressable blob store.
///
/// Implementations must be Send + Sync for use across async tasks.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Read the full payload behind a key.
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Write a payload. Uploading a key that already exists is success:
    /// content is immutable, so concurrent writers of the same key converge.
    async fn upload(&self, key: &str, data: Bytes) -> Result<()>;

    /// Delete a set of keys. Missing keys are ignored.
    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.read(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

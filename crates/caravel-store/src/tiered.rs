//! Tiered failover façade over the two backends

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::ArtifactStore;
use crate::error::Result;

/// Layered store: reads try the large-object backend first (when configured)
/// and fall back to the small-object backend on not-found; writes and
/// deletes prefer the large-object backend when configured.
#[derive(Clone)]
pub struct TieredStore {
    small: Arc<dyn ArtifactStore>,
    large: Option<Arc<dyn ArtifactStore>>,
}

impl TieredStore {
    pub fn new(small: Arc<dyn ArtifactStore>, large: Option<Arc<dyn ArtifactStore>>) -> Self {
        Self { small, large }
    }

    /// Store without a large-object tier.
    pub fn small_only(small: Arc<dyn ArtifactStore>) -> Self {
        Self { small, large: None }
    }

    fn preferred(&self) -> &dyn ArtifactStore {
        match &self.large {
            Some(large) => large.as_ref(),
            None => self.small.as_ref(),
        }
    }
}

#[async_trait]
impl ArtifactStore for TieredStore {
    async fn read(&self, key: &str) -> Result<Bytes> {
        if let Some(large) = &self.large {
            match large.read(key).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(key, "falling back to small-object store");
                }
                Err(e) => return Err(e),
            }
        }
        self.small.read(key).await
    }

    async fn upload(&self, key: &str, data: Bytes) -> Result<()> {
        self.preferred().upload(key, data).await
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        self.preferred().delete(keys).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if let Some(large) = &self.large {
            if large.exists(key).await? {
                return Ok(true);
            }
        }
        self.small.exists(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::mock::MemoryStore;

    fn bytes(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[tokio::test]
    async fn roundtrip_without_large_backend() {
        let small = Arc::new(MemoryStore::new());
        let store = TieredStore::small_only(small.clone());

        store.upload("v1", bytes("payload")).await.unwrap();
        assert_eq!(store.read("v1").await.unwrap(), bytes("payload"));
        assert_eq!(small.counts().uploads, 1);
    }

    #[tokio::test]
    async fn roundtrip_with_large_backend_prefers_it() {
        let small = Arc::new(MemoryStore::new());
        let large = Arc::new(MemoryStore::new());
        let store = TieredStore::new(small.clone(), Some(large.clone()));

        store.upload("v1", bytes("payload")).await.unwrap();
        assert_eq!(large.counts().uploads, 1);
        assert_eq!(small.counts().uploads, 0);
        assert_eq!(store.read("v1").await.unwrap(), bytes("payload"));
    }

    #[tokio::test]
    async fn read_falls_back_to_small_backend() {
        let small = Arc::new(MemoryStore::new());
        let large = Arc::new(MemoryStore::new());
        small.upload("legacy", bytes("old")).await.unwrap();

        let store = TieredStore::new(small.clone(), Some(large));
        assert_eq!(store.read("legacy").await.unwrap(), bytes("old"));
    }

    #[tokio::test]
    async fn missing_key_is_not_found_in_both_tiers() {
        let store = TieredStore::new(
            Arc::new(MemoryStore::new()),
            Some(Arc::new(MemoryStore::new())),
        );
        let err = store.read("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn upload_existing_key_is_idempotent() {
        let store = TieredStore::small_only(Arc::new(MemoryStore::new()));
        store.upload("v1", bytes("payload")).await.unwrap();
        store.upload("v1", bytes("payload")).await.unwrap();
        assert_eq!(store.read("v1").await.unwrap(), bytes("payload"));
    }

    #[tokio::test]
    async fn delete_missing_key_is_noop() {
        let store = TieredStore::small_only(Arc::new(MemoryStore::new()));
        store.delete(&["nope".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn non_not_found_read_errors_propagate() {
        let small = Arc::new(MemoryStore::new());
        let large = Arc::new(MemoryStore::new());
        large.fail_reads("backend down");

        let store = TieredStore::new(small, Some(large));
        let err = store.read("v1").await.unwrap_err();
        assert!(matches!(err, StoreError::ObjectStore { .. }));
    }
}

//! In-memory store for tests
//!
//! Mirrors the real backends' failure semantics (idempotent upload, no-op
//! delete of missing keys) and tracks operation counts so tests can assert
//! on write behavior.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::ArtifactStore;
use crate::error::{Result, StoreError};

/// Counts of operations performed, for testing assertions
#[derive(Debug, Default, Clone)]
pub struct StoreCounts {
    pub reads: usize,
    pub uploads: usize,
    pub deletes: usize,
}

/// In-memory artifact store
#[derive(Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<RwLock<HashMap<String, Bytes>>>,
    counts: Arc<RwLock<StoreCounts>>,
    read_failure: Arc<RwLock<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> StoreCounts {
        self.counts.read().unwrap().clone()
    }

    /// Make every read fail with an infrastructure error (not not-found).
    pub fn fail_reads(&self, message: &str) {
        *self.read_failure.write().unwrap() = Some(message.to_string());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.read().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().unwrap().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Bytes> {
        self.counts.write().unwrap().reads += 1;

        if let Some(message) = self.read_failure.read().unwrap().clone() {
            return Err(StoreError::ObjectStore { message });
        }

        self.blobs
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn upload(&self, key: &str, data: Bytes) -> Result<()> {
        self.counts.write().unwrap().uploads += 1;
        // Existing keys keep their content; matching the immutable-blob rule
        self.blobs
            .write()
            .unwrap()
            .entry(key.to_string())
            .or_insert(data);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        self.counts.write().unwrap().deletes += 1;
        let mut blobs = self.blobs.write().unwrap();
        for key in keys {
            blobs.remove(key);
        }
        Ok(())
    }
}

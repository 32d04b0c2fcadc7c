//! Catalog persistence seam
//!
//! The synchronizer reads and writes catalog objects through this trait so
//! the diffing logic stays independent of where the objects live. The
//! CR-backed implementation sits in the controller crate; the in-memory one
//! here backs tests and tracks operation counts for write assertions.

use async_trait::async_trait;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use caravel_core::apps::{Application, ApplicationVersion};
use caravel_core::{APP_LABEL, REPO_LABEL};

use crate::error::Result;

/// Catalog object store used by the synchronizer.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_app(&self, id: &str) -> Result<Option<Application>>;
    async fn create_app(&self, app: &Application) -> Result<()>;
    async fn update_app(&self, app: &Application) -> Result<()>;
    async fn delete_app(&self, id: &str) -> Result<()>;
    /// All applications originating from one repo.
    async fn list_apps(&self, repo: &str) -> Result<Vec<Application>>;

    async fn get_version(&self, id: &str) -> Result<Option<ApplicationVersion>>;
    async fn create_version(&self, version: &ApplicationVersion) -> Result<()>;
    async fn update_version(&self, version: &ApplicationVersion) -> Result<()>;
    async fn delete_version(&self, id: &str) -> Result<()>;
    /// All versions of one application.
    async fn list_versions(&self, repo: &str, app_id: &str) -> Result<Vec<ApplicationVersion>>;
}

/// Counts of write operations, for testing assertions
#[derive(Debug, Default, Clone)]
pub struct CatalogCounts {
    pub app_creates: usize,
    pub app_updates: usize,
    pub app_deletes: usize,
    pub version_creates: usize,
    pub version_updates: usize,
    pub version_deletes: usize,
}

impl CatalogCounts {
    pub fn writes(&self) -> usize {
        self.app_creates
            + self.app_updates
            + self.app_deletes
            + self.version_creates
            + self.version_updates
            + self.version_deletes
    }
}

#[derive(Default)]
struct MemoryCatalogState {
    apps: HashMap<String, Application>,
    versions: HashMap<String, ApplicationVersion>,
    counts: CatalogCounts,
}

/// In-memory catalog store
#[derive(Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<RwLock<MemoryCatalogState>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> CatalogCounts {
        self.state.read().unwrap().counts.clone()
    }

    pub fn reset_counts(&self) {
        self.state.write().unwrap().counts = CatalogCounts::default();
    }

    pub fn app_count(&self) -> usize {
        self.state.read().unwrap().apps.len()
    }

    pub fn version_count(&self) -> usize {
        self.state.read().unwrap().versions.len()
    }
}

fn label_matches(labels: &std::collections::BTreeMap<String, String>, key: &str, value: &str) -> bool {
    labels.get(key).map(String::as_str) == Some(value)
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get_app(&self, id: &str) -> Result<Option<Application>> {
        Ok(self.state.read().unwrap().apps.get(id).cloned())
    }

    async fn create_app(&self, app: &Application) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.counts.app_creates += 1;
        state.apps.insert(app.name_any(), app.clone());
        Ok(())
    }

    async fn update_app(&self, app: &Application) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.counts.app_updates += 1;
        state.apps.insert(app.name_any(), app.clone());
        Ok(())
    }

    async fn delete_app(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.counts.app_deletes += 1;
        state.apps.remove(id);
        Ok(())
    }

    async fn list_apps(&self, repo: &str) -> Result<Vec<Application>> {
        let state = self.state.read().unwrap();
        Ok(state
            .apps
            .values()
            .filter(|a| label_matches(a.labels(), REPO_LABEL, repo))
            .cloned()
            .collect())
    }

    async fn get_version(&self, id: &str) -> Result<Option<ApplicationVersion>> {
        Ok(self.state.read().unwrap().versions.get(id).cloned())
    }

    async fn create_version(&self, version: &ApplicationVersion) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.counts.version_creates += 1;
        state.versions.insert(version.name_any(), version.clone());
        Ok(())
    }

    async fn update_version(&self, version: &ApplicationVersion) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.counts.version_updates += 1;
        state.versions.insert(version.name_any(), version.clone());
        Ok(())
    }

    async fn delete_version(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.counts.version_deletes += 1;
        state.versions.remove(id);
        Ok(())
    }

    async fn list_versions(&self, repo: &str, app_id: &str) -> Result<Vec<ApplicationVersion>> {
        let state = self.state.read().unwrap();
        Ok(state
            .versions
            .values()
            .filter(|v| {
                label_matches(v.labels(), REPO_LABEL, repo)
                    && label_matches(v.labels(), APP_LABEL, app_id)
            })
            .cloned()
            .collect())
    }
}

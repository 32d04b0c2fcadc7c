//! Object persistence seams for the reconcilers
//!
//! Release and repo objects are mutated optimistically: the CR-backed
//! implementations replace with the read resourceVersion, so a concurrent
//! writer fails the write and the reconcile retries from scratch on the
//! next delivery. The in-memory implementations back tests and count writes
//! so idempotence is assertable.

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use caravel_core::apps::{Application, ApplicationVersion};
use caravel_core::release::ApplicationRelease;
use caravel_core::repo::Repo;
use caravel_core::{APP_LABEL, RELEASE_FINALIZER, REPO_FINALIZER, REPO_LABEL};
use caravel_repo::catalog::CatalogStore;
use caravel_repo::error::{RepoError, Result as RepoResult};

use crate::error::Result;

/// Release object persistence used by the release reconciler.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<ApplicationRelease>>;

    /// Persist the status subresource (optimistic write).
    async fn update_status(&self, release: &ApplicationRelease) -> Result<()>;

    /// Add the cleanup finalizer if absent.
    async fn ensure_finalizer(&self, id: &str) -> Result<()>;

    /// Remove the cleanup finalizer, allowing garbage collection.
    async fn clear_finalizer(&self, id: &str) -> Result<()>;
}

/// Repo object persistence used by the repo reconciler.
#[async_trait]
pub trait RepoStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Repo>>;
    async fn update_status(&self, repo: &Repo) -> Result<()>;

    /// Add the catalog-cleanup finalizer if absent.
    async fn ensure_finalizer(&self, id: &str) -> Result<()>;

    /// Remove the catalog-cleanup finalizer, allowing garbage collection.
    async fn clear_finalizer(&self, id: &str) -> Result<()>;
}

// ---------- CR-backed implementations ----------

/// Release store over the host cluster's custom resources
pub struct KubeReleaseStore {
    api: Api<ApplicationRelease>,
}

impl KubeReleaseStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl ReleaseStore for KubeReleaseStore {
    async fn get(&self, id: &str) -> Result<Option<ApplicationRelease>> {
        Ok(self.api.get_opt(id).await?)
    }

    async fn update_status(&self, release: &ApplicationRelease) -> Result<()> {
        let name = release.name_any();
        let data = serde_json::to_vec(release)?;
        self.api
            .replace_status(&name, &PostParams::default(), data)
            .await?;
        Ok(())
    }

    async fn ensure_finalizer(&self, id: &str) -> Result<()> {
        let mut release = match self.api.get_opt(id).await? {
            Some(r) => r,
            None => return Ok(()),
        };
        if release.finalizers().contains(&RELEASE_FINALIZER.to_string()) {
            return Ok(());
        }
        release
            .finalizers_mut()
            .push(RELEASE_FINALIZER.to_string());
        self.api
            .replace(id, &PostParams::default(), &release)
            .await?;
        Ok(())
    }

    async fn clear_finalizer(&self, id: &str) -> Result<()> {
        let mut release = match self.api.get_opt(id).await? {
            Some(r) => r,
            None => return Ok(()),
        };
        let before = release.finalizers().len();
        release.finalizers_mut().retain(|f| f != RELEASE_FINALIZER);
        if release.finalizers().len() == before {
            return Ok(());
        }
        self.api
            .replace(id, &PostParams::default(), &release)
            .await?;
        Ok(())
    }
}

/// Repo store over the host cluster's custom resources
pub struct KubeRepoStore {
    api: Api<Repo>,
}

impl KubeRepoStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl RepoStore for KubeRepoStore {
    async fn get(&self, id: &str) -> Result<Option<Repo>> {
        Ok(self.api.get_opt(id).await?)
    }

    async fn update_status(&self, repo: &Repo) -> Result<()> {
        let name = repo.name_any();
        let data = serde_json::to_vec(repo)?;
        self.api
            .replace_status(&name, &PostParams::default(), data)
            .await?;
        Ok(())
    }

    async fn ensure_finalizer(&self, id: &str) -> Result<()> {
        let mut repo = match self.api.get_opt(id).await? {
            Some(r) => r,
            None => return Ok(()),
        };
        if repo.finalizers().contains(&REPO_FINALIZER.to_string()) {
            return Ok(());
        }
        repo.finalizers_mut().push(REPO_FINALIZER.to_string());
        self.api.replace(id, &PostParams::default(), &repo).await?;
        Ok(())
    }

    async fn clear_finalizer(&self, id: &str) -> Result<()> {
        let mut repo = match self.api.get_opt(id).await? {
            Some(r) => r,
            None => return Ok(()),
        };
        let before = repo.finalizers().len();
        repo.finalizers_mut().retain(|f| f != REPO_FINALIZER);
        if repo.finalizers().len() == before {
            return Ok(());
        }
        self.api.replace(id, &PostParams::default(), &repo).await?;
        Ok(())
    }
}

/// Catalog store over the host cluster's custom resources
pub struct KubeCatalog {
    apps: Api<Application>,
    versions: Api<ApplicationVersion>,
}

impl KubeCatalog {
    pub fn new(client: Client) -> Self {
        Self {
            apps: Api::all(client.clone()),
            versions: Api::all(client),
        }
    }
}

#[async_trait]
impl CatalogStore for KubeCatalog {
    async fn get_app(&self, id: &str) -> RepoResult<Option<Application>> {
        Ok(self.apps.get_opt(id).await?)
    }

    async fn create_app(&self, app: &Application) -> RepoResult<()> {
        self.apps.create(&PostParams::default(), app).await?;
        Ok(())
    }

    async fn update_app(&self, app: &Application) -> RepoResult<()> {
        let name = app.name_any();
        self.apps
            .replace(&name, &PostParams::default(), app)
            .await?;
        Ok(())
    }

    async fn delete_app(&self, id: &str) -> RepoResult<()> {
        match self.apps.delete(id, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(RepoError::Api(e)),
        }
    }

    async fn list_apps(&self, repo: &str) -> RepoResult<Vec<Application>> {
        let lp = ListParams::default().labels(&format!("{}={}", REPO_LABEL, repo));
        Ok(self.apps.list(&lp).await?.items)
    }

    async fn get_version(&self, id: &str) -> RepoResult<Option<ApplicationVersion>> {
        Ok(self.versions.get_opt(id).await?)
    }

    async fn create_version(&self, version: &ApplicationVersion) -> RepoResult<()> {
        self.versions.create(&PostParams::default(), version).await?;
        Ok(())
    }

    async fn update_version(&self, version: &ApplicationVersion) -> RepoResult<()> {
        let name = version.name_any();
        self.versions
            .replace(&name, &PostParams::default(), version)
            .await?;
        Ok(())
    }

    async fn delete_version(&self, id: &str) -> RepoResult<()> {
        match self.versions.delete(id, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(RepoError::Api(e)),
        }
    }

    async fn list_versions(&self, repo: &str, app_id: &str) -> RepoResult<Vec<ApplicationVersion>> {
        let lp = ListParams::default()
            .labels(&format!("{}={},{}={}", REPO_LABEL, repo, APP_LABEL, app_id));
        Ok(self.versions.list(&lp).await?.items)
    }
}

// ---------- In-memory implementations ----------

/// Write counts for testing assertions
#[derive(Debug, Default, Clone)]
pub struct StoreCounters {
    pub status_updates: usize,
    pub finalizers_added: usize,
    pub finalizers_removed: usize,
}

#[derive(Default)]
struct MemoryReleaseState {
    releases: HashMap<String, ApplicationRelease>,
    counters: StoreCounters,
}

/// In-memory release store; garbage-collects objects once the finalizer is
/// cleared from a deletion-marked object, like the API server would.
#[derive(Clone, Default)]
pub struct MemoryReleaseStore {
    state: Arc<RwLock<MemoryReleaseState>>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, release: ApplicationRelease) {
        let mut state = self.state.write().unwrap();
        state.releases.insert(release.name_any(), release);
    }

    /// Mark an object for deletion, as `kubectl delete` would.
    pub fn request_delete(&self, id: &str) {
        let mut state = self.state.write().unwrap();
        if let Some(release) = state.releases.get_mut(id) {
            release.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<ApplicationRelease> {
        self.state.read().unwrap().releases.get(id).cloned()
    }

    pub fn has_finalizer(&self, id: &str) -> bool {
        self.snapshot(id)
            .map(|r| r.finalizers().contains(&RELEASE_FINALIZER.to_string()))
            .unwrap_or(false)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.state.read().unwrap().releases.contains_key(id)
    }

    pub fn counters(&self) -> StoreCounters {
        self.state.read().unwrap().counters.clone()
    }

    pub fn reset_counters(&self) {
        self.state.write().unwrap().counters = StoreCounters::default();
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn get(&self, id: &str) -> Result<Option<ApplicationRelease>> {
        Ok(self.snapshot(id))
    }

    async fn update_status(&self, release: &ApplicationRelease) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.counters.status_updates += 1;
        if let Some(stored) = state.releases.get_mut(&release.name_any()) {
            stored.status = release.status.clone();
        }
        Ok(())
    }

    async fn ensure_finalizer(&self, id: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;
        if let Some(release) = state.releases.get_mut(id) {
            if !release.finalizers().contains(&RELEASE_FINALIZER.to_string()) {
                release
                    .finalizers_mut()
                    .push(RELEASE_FINALIZER.to_string());
                state.counters.finalizers_added += 1;
            }
        }
        Ok(())
    }

    async fn clear_finalizer(&self, id: &str) -> Result<()> {
        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;
        let gc = if let Some(release) = state.releases.get_mut(id) {
            let before = release.finalizers().len();
            release.finalizers_mut().retain(|f| f != RELEASE_FINALIZER);
            if release.finalizers().len() != before {
                state.counters.finalizers_removed += 1;
            }
            release.metadata.deletion_timestamp.is_some() && release.finalizers().is_empty()
        } else {
            false
        };
        if gc {
            state.releases.remove(id);
        }
        Ok(())
    }
}

/// In-memory repo store; garbage-collects deletion-marked objects once the
/// finalizer is cleared.
#[derive(Clone, Default)]
pub struct MemoryRepoStore {
    repos: Arc<RwLock<HashMap<String, Repo>>>,
    status_updates: Arc<RwLock<usize>>,
}

impl MemoryRepoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, repo: Repo) {
        self.repos.write().unwrap().insert(repo.name_any(), repo);
    }

    /// Mark an object for deletion, as `kubectl delete` would.
    pub fn request_delete(&self, id: &str) {
        let mut repos = self.repos.write().unwrap();
        if let Some(repo) = repos.get_mut(id) {
            repo.metadata.deletion_timestamp = Some(Time(Utc::now()));
        }
    }

    pub fn snapshot(&self, id: &str) -> Option<Repo> {
        self.repos.read().unwrap().get(id).cloned()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.repos.read().unwrap().contains_key(id)
    }

    pub fn status_updates(&self) -> usize {
        *self.status_updates.read().unwrap()
    }
}

#[async_trait]
impl RepoStore for MemoryRepoStore {
    async fn get(&self, id: &str) -> Result<Option<Repo>> {
        Ok(self.snapshot(id))
    }

    async fn update_status(&self, repo: &Repo) -> Result<()> {
        *self.status_updates.write().unwrap() += 1;
        let mut repos = self.repos.write().unwrap();
        if let Some(stored) = repos.get_mut(&repo.name_any()) {
            stored.status = repo.status.clone();
        }
        Ok(())
    }

    async fn ensure_finalizer(&self, id: &str) -> Result<()> {
        let mut repos = self.repos.write().unwrap();
        if let Some(repo) = repos.get_mut(id) {
            if !repo.finalizers().contains(&REPO_FINALIZER.to_string()) {
                repo.finalizers_mut().push(REPO_FINALIZER.to_string());
            }
        }
        Ok(())
    }

    async fn clear_finalizer(&self, id: &str) -> Result<()> {
        let mut repos = self.repos.write().unwrap();
        let gc = if let Some(repo) = repos.get_mut(id) {
            repo.finalizers_mut().retain(|f| f != REPO_FINALIZER);
            repo.metadata.deletion_timestamp.is_some() && repo.finalizers().is_empty()
        } else {
            false
        };
        if gc {
            repos.remove(id);
        }
        Ok(())
    }
}

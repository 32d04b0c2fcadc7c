//! Repository synchronizer
//!
//! Diffs a fetched index against the existing catalog by content digest and
//! applies the minimal set of creates, updates and deletes. Re-running
//! against an unchanged index performs no writes.

use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::Arc;

use caravel_core::apps::{
    Application, ApplicationSpec, ApplicationVersion, ApplicationVersionSpec, AppType,
};
use caravel_core::names::{app_id, normalize_version, version_id};
use caravel_core::repo::Repo;
use caravel_core::{APP_LABEL, REPO_LABEL};
use caravel_store::ArtifactStore;

use crate::catalog::CatalogStore;
use crate::error::Result;
use crate::fetch::{IndexFetcher, resolve_pull_url};
use crate::index::{ChartEntry, RepositoryIndex, collapse_versions};

/// Outcome of one sync pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl SyncSummary {
    pub fn writes(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Keeps the catalog eventually consistent with one upstream repository
pub struct Synchronizer<C> {
    catalog: C,
    fetcher: IndexFetcher,
    /// Used for best-effort blob cleanup when uploaded versions disappear
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl<C: CatalogStore> Synchronizer<C> {
    pub fn new(catalog: C) -> Self {
        Self {
            catalog,
            fetcher: IndexFetcher::new(),
            artifacts: None,
        }
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    /// Fetch the repository index and reconcile the catalog against it.
    pub async fn sync(&self, repo: &Repo) -> Result<SyncSummary> {
        let index = self.fetcher.fetch(repo).await?;
        self.apply_index(repo, &index).await
    }

    /// Reconcile the catalog against an already-fetched index.
    pub async fn apply_index(&self, repo: &Repo, index: &RepositoryIndex) -> Result<SyncSummary> {
        let repo_name = repo.name_any();
        let mut summary = SyncSummary::default();

        // Collapse the index to one entry per (chart, semantic version)
        let mut desired: HashMap<String, (String, Vec<ChartEntry>)> = HashMap::new();
        for (chart, entries) in &index.entries {
            let collapsed = collapse_versions(entries);
            if !collapsed.is_empty() {
                desired.insert(app_id(&repo_name, chart), (chart.clone(), collapsed));
            }
        }

        // Charts that vanished from the index take their catalog entries along
        for app in self.catalog.list_apps(&repo_name).await? {
            let id = app.name_any();
            if desired.contains_key(&id) {
                continue;
            }
            for version in self.catalog.list_versions(&repo_name, &id).await? {
                self.remove_version(&version).await?;
                summary.deleted += 1;
            }
            self.remove_app(&app).await?;
            summary.deleted += 1;
            tracing::info!(repo = %repo_name, app = %id, "removed application absent from index");
        }

        for (id, (chart, entries)) in desired {
            self.sync_chart(repo, &repo_name, &id, &chart, &entries, &mut summary)
                .await?;
        }

        tracing::info!(
            repo = %repo_name,
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            unchanged = summary.unchanged,
            "repository sync complete"
        );
        Ok(summary)
    }

    async fn sync_chart(
        &self,
        repo: &Repo,
        repo_name: &str,
        id: &str,
        chart: &str,
        entries: &[ChartEntry],
        summary: &mut SyncSummary,
    ) -> Result<()> {
        let newest = &entries[0];
        self.ensure_app(repo_name, id, chart, newest, summary).await?;

        let mut recorded: HashMap<String, ApplicationVersion> = self
            .catalog
            .list_versions(repo_name, id)
            .await?
            .into_iter()
            .map(|v| (normalize_version(&v.spec.version_name), v))
            .collect();

        let desired: HashMap<String, &ChartEntry> = entries
            .iter()
            .map(|e| (normalize_version(&e.version), e))
            .collect();

        // Versions no longer present in the index
        for (norm, version) in &recorded {
            if !desired.contains_key(norm) {
                self.remove_version(version).await?;
                summary.deleted += 1;
            }
        }

        for (norm, entry) in desired {
            let version_name = version_id(id, &entry.version);
            match recorded.remove(&norm) {
                Some(existing)
                    if existing.spec.digest.is_some()
                        && existing.spec.digest == entry.digest =>
                {
                    summary.unchanged += 1;
                }
                Some(mut existing) => {
                    existing.spec = self.version_spec(repo, entry);
                    self.catalog.update_version(&existing).await?;
                    summary.updated += 1;
                }
                None => {
                    let mut version =
                        ApplicationVersion::new(&version_name, self.version_spec(repo, entry));
                    let labels = version.labels_mut();
                    labels.insert(REPO_LABEL.to_string(), repo_name.to_string());
                    labels.insert(APP_LABEL.to_string(), id.to_string());
                    self.catalog.create_version(&version).await?;
                    summary.created += 1;
                }
            }
        }

        Ok(())
    }

    /// Create the application on first sight, or backfill metadata fields
    /// the chart publishes and the catalog does not have yet.
    async fn ensure_app(
        &self,
        repo_name: &str,
        id: &str,
        chart: &str,
        newest: &ChartEntry,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        match self.catalog.get_app(id).await? {
            None => {
                let mut app = Application::new(
                    id,
                    ApplicationSpec {
                        display_name: Some(chart.to_string()),
                        icon: newest.icon.clone(),
                        app_home: newest.home.clone(),
                        app_type: AppType::Helm,
                        abstraction: newest.description.clone(),
                        attachments: Vec::new(),
                    },
                );
                app.labels_mut()
                    .insert(REPO_LABEL.to_string(), repo_name.to_string());
                self.catalog.create_app(&app).await?;
                summary.created += 1;
            }
            Some(mut app) => {
                let mut changed = false;
                if app.spec.icon.is_none() && newest.icon.is_some() {
                    app.spec.icon = newest.icon.clone();
                    changed = true;
                }
                if app.spec.app_home.is_none() && newest.home.is_some() {
                    app.spec.app_home = newest.home.clone();
                    changed = true;
                }
                if app.spec.abstraction.is_none() && newest.description.is_some() {
                    app.spec.abstraction = newest.description.clone();
                    changed = true;
                }
                if changed {
                    self.catalog.update_app(&app).await?;
                    summary.updated += 1;
                }
            }
        }
        Ok(())
    }

    fn version_spec(&self, repo: &Repo, entry: &ChartEntry) -> ApplicationVersionSpec {
        let pull_url = entry
            .download_url()
            .map(|u| resolve_pull_url(&repo.spec.url, u));

        ApplicationVersionSpec {
            version_name: entry.version.clone(),
            app_type: AppType::Helm,
            digest: entry.digest.clone(),
            pull_url,
            package_key: None,
            description: entry.description.clone(),
            icon: entry.icon.clone(),
            created: entry.created,
            maintainers: entry.maintainers.clone(),
        }
    }

    /// Remove every catalog entry a repo produced, blobs included. Used when
    /// the repo object itself is deleted.
    pub async fn purge(&self, repo_name: &str) -> Result<usize> {
        let mut removed = 0;
        for app in self.catalog.list_apps(repo_name).await? {
            let id = app.name_any();
            for version in self.catalog.list_versions(repo_name, &id).await? {
                self.remove_version(&version).await?;
                removed += 1;
            }
            self.remove_app(&app).await?;
            removed += 1;
        }
        tracing::info!(repo = %repo_name, removed, "catalog purged");
        Ok(removed)
    }

    /// Delete an application and, best-effort, its attachment blobs.
    async fn remove_app(&self, app: &Application) -> Result<()> {
        if let Some(store) = &self.artifacts {
            if !app.spec.attachments.is_empty() {
                if let Err(e) = store.delete(&app.spec.attachments).await {
                    tracing::warn!(app = %app.name_any(), error = %e, "attachment cleanup failed");
                }
            }
        }
        self.catalog.delete_app(&app.name_any()).await
    }

    /// Delete a catalog version; uploaded blobs go with the last reference.
    async fn remove_version(&self, version: &ApplicationVersion) -> Result<()> {
        if let (Some(store), Some(key)) = (&self.artifacts, &version.spec.package_key) {
            if let Err(e) = store.delete(std::slice::from_ref(key)).await {
                // Cleanup is best-effort; the catalog delete still proceeds
                tracing::warn!(key = %key, error = %e, "artifact cleanup failed");
            }
        }
        self.catalog.delete_version(&version.name_any()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use caravel_core::repo::RepoSpec;
    use caravel_store::MemoryStore;

    fn repo() -> Repo {
        Repo::new(
            "bitnami",
            RepoSpec {
                url: "https://charts.example.com".to_string(),
                credential: None,
                sync_period_seconds: 300,
                description: None,
            },
        )
    }

    fn entry(name: &str, version: &str, digest: &str) -> ChartEntry {
        ChartEntry {
            name: name.to_string(),
            version: version.to_string(),
            digest: Some(digest.to_string()),
            urls: vec![format!("charts/{}-{}.tgz", name, version)],
            description: Some(format!("{} chart", name)),
            icon: Some("https://example.com/icon.png".to_string()),
            ..Default::default()
        }
    }

    fn index(entries: Vec<ChartEntry>) -> RepositoryIndex {
        let mut idx = RepositoryIndex::default();
        for e in entries {
            idx.entries.entry(e.name.clone()).or_default().push(e);
        }
        idx
    }

    #[tokio::test]
    async fn first_sync_creates_apps_and_versions() {
        let catalog = MemoryCatalog::new();
        let sync = Synchronizer::new(catalog.clone());

        let summary = sync
            .apply_index(&repo(), &index(vec![entry("nginx", "1.0.0", "abc")]))
            .await
            .unwrap();

        assert_eq!(summary.created, 2); // app + version
        assert_eq!(catalog.app_count(), 1);
        assert_eq!(catalog.version_count(), 1);

        let versions = catalog.list_versions("bitnami", "bitnami-nginx").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(
            versions[0].spec.pull_url.as_deref(),
            Some("https://charts.example.com/charts/nginx-1.0.0.tgz")
        );
        assert_eq!(versions[0].spec.digest.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn unchanged_index_performs_zero_writes() {
        let catalog = MemoryCatalog::new();
        let sync = Synchronizer::new(catalog.clone());
        let idx = index(vec![entry("nginx", "1.0.0", "abc"), entry("redis", "2.0.0", "def")]);

        sync.apply_index(&repo(), &idx).await.unwrap();
        catalog.reset_counts();

        let summary = sync.apply_index(&repo(), &idx).await.unwrap();
        assert_eq!(summary.writes(), 0);
        assert_eq!(summary.unchanged, 2);
        assert_eq!(catalog.counts().writes(), 0);
    }

    #[tokio::test]
    async fn digest_change_produces_exactly_one_update() {
        let catalog = MemoryCatalog::new();
        let sync = Synchronizer::new(catalog.clone());

        sync.apply_index(&repo(), &index(vec![entry("nginx", "1.0.0", "abc")]))
            .await
            .unwrap();
        catalog.reset_counts();

        let summary = sync
            .apply_index(&repo(), &index(vec![entry("nginx", "1.0.0", "changed")]))
            .await
            .unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.created, 0);
        let counts = catalog.counts();
        assert_eq!(counts.version_updates, 1);
        assert_eq!(counts.version_creates, 0);

        let versions = catalog.list_versions("bitnami", "bitnami-nginx").await.unwrap();
        assert_eq!(versions[0].spec.digest.as_deref(), Some("changed"));
    }

    #[tokio::test]
    async fn removed_chart_deletes_app_and_versions() {
        let catalog = MemoryCatalog::new();
        let sync = Synchronizer::new(catalog.clone());

        sync.apply_index(
            &repo(),
            &index(vec![
                entry("nginx", "1.0.0", "a"),
                entry("nginx", "1.1.0", "b"),
                entry("redis", "2.0.0", "c"),
            ]),
        )
        .await
        .unwrap();
        assert_eq!(catalog.app_count(), 2);
        assert_eq!(catalog.version_count(), 3);

        sync.apply_index(&repo(), &index(vec![entry("redis", "2.0.0", "c")]))
            .await
            .unwrap();

        assert_eq!(catalog.app_count(), 1);
        assert_eq!(catalog.version_count(), 1);
        assert!(catalog.get_app("bitnami-nginx").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_version_is_deleted_and_newer_kept() {
        let catalog = MemoryCatalog::new();
        let sync = Synchronizer::new(catalog.clone());

        sync.apply_index(
            &repo(),
            &index(vec![entry("nginx", "1.0.0", "a"), entry("nginx", "1.1.0", "b")]),
        )
        .await
        .unwrap();

        sync.apply_index(&repo(), &index(vec![entry("nginx", "1.1.0", "b")]))
            .await
            .unwrap();

        let versions = catalog.list_versions("bitnami", "bitnami-nginx").await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].spec.version_name, "1.1.0");
    }

    #[tokio::test]
    async fn blob_cleanup_for_uploaded_versions() {
        let catalog = MemoryCatalog::new();
        let artifacts = Arc::new(MemoryStore::new());
        artifacts
            .upload("uploaded-key", bytes::Bytes::from_static(b"pkg"))
            .await
            .unwrap();

        // Seed a version that carries an uploaded blob
        let mut version = ApplicationVersion::new(
            "bitnami-nginx-0.9.0",
            ApplicationVersionSpec {
                version_name: "0.9.0".to_string(),
                app_type: AppType::Helm,
                digest: Some("old".to_string()),
                pull_url: None,
                package_key: Some("uploaded-key".to_string()),
                description: None,
                icon: None,
                created: None,
                maintainers: vec![],
            },
        );
        version
            .labels_mut()
            .insert(REPO_LABEL.to_string(), "bitnami".to_string());
        version
            .labels_mut()
            .insert(APP_LABEL.to_string(), "bitnami-nginx".to_string());
        catalog.create_version(&version).await.unwrap();

        let sync = Synchronizer::new(catalog.clone()).with_artifacts(artifacts.clone());
        sync.apply_index(&repo(), &index(vec![entry("nginx", "1.0.0", "abc")]))
            .await
            .unwrap();

        assert!(!artifacts.contains("uploaded-key"));
        assert!(
            catalog
                .list_versions("bitnami", "bitnami-nginx")
                .await
                .unwrap()
                .iter()
                .all(|v| v.spec.version_name != "0.9.0")
        );
    }

    #[tokio::test]
    async fn removed_app_takes_attachments_along() {
        let catalog = MemoryCatalog::new();
        let artifacts = Arc::new(MemoryStore::new());
        artifacts
            .upload("screenshot-1a2b3c", bytes::Bytes::from_static(b"png"))
            .await
            .unwrap();

        let mut app = Application::new(
            "bitnami-legacy",
            ApplicationSpec {
                display_name: Some("legacy".to_string()),
                icon: None,
                app_home: None,
                app_type: AppType::Helm,
                abstraction: None,
                attachments: vec!["screenshot-1a2b3c".to_string()],
            },
        );
        app.labels_mut()
            .insert(REPO_LABEL.to_string(), "bitnami".to_string());
        catalog.create_app(&app).await.unwrap();

        let sync = Synchronizer::new(catalog.clone()).with_artifacts(artifacts.clone());
        sync.apply_index(&repo(), &index(vec![entry("nginx", "1.0.0", "abc")]))
            .await
            .unwrap();

        assert!(catalog.get_app("bitnami-legacy").await.unwrap().is_none());
        assert!(!artifacts.contains("screenshot-1a2b3c"));
    }

    #[tokio::test]
    async fn app_metadata_backfilled_when_unset() {
        let catalog = MemoryCatalog::new();
        let sync = Synchronizer::new(catalog.clone());

        let mut bare = entry("nginx", "1.0.0", "a");
        bare.icon = None;
        bare.description = None;
        sync.apply_index(&repo(), &index(vec![bare])).await.unwrap();

        let app = catalog.get_app("bitnami-nginx").await.unwrap().unwrap();
        assert!(app.spec.icon.is_none());

        sync.apply_index(&repo(), &index(vec![entry("nginx", "1.0.0", "a")]))
            .await
            .unwrap();
        let app = catalog.get_app("bitnami-nginx").await.unwrap().unwrap();
        assert_eq!(app.spec.icon.as_deref(), Some("https://example.com/icon.png"));
    }
}

//! Repository sync reconciler
//!
//! Gates each sync on the repo's configured period, records
//! syncing/success/failure on status, and schedules the next pass as a
//! requeue-after delay.

use chrono::Utc;
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;

use caravel_core::repo::{Repo, SyncDecision, SyncPhase};
use caravel_repo::Synchronizer;
use caravel_repo::catalog::CatalogStore;

use crate::error::Result;
use crate::stores::RepoStore;

/// Reconciler for `Repo` objects
pub struct RepoReconciler<C> {
    repos: Arc<dyn RepoStore>,
    synchronizer: Synchronizer<C>,
}

impl<C: CatalogStore> RepoReconciler<C> {
    pub fn new(repos: Arc<dyn RepoStore>, synchronizer: Synchronizer<C>) -> Self {
        Self {
            repos,
            synchronizer,
        }
    }

    /// One reconcile pass. Returns the requeue-after delay, if any.
    pub async fn reconcile(&self, id: &str) -> Result<Option<Duration>> {
        let repo = match self.repos.get(id).await? {
            Some(r) => r,
            None => return Ok(None),
        };

        // A deleted repo takes every catalog entry it produced along
        if repo.metadata.deletion_timestamp.is_some() {
            self.synchronizer.purge(&repo.name_any()).await?;
            self.repos.clear_finalizer(id).await?;
            return Ok(None);
        }
        self.repos.ensure_finalizer(id).await?;

        match repo.sync_decision(Utc::now()) {
            SyncDecision::Disabled => {
                if repo.status.as_ref().map(|s| s.state) != Some(SyncPhase::NoSync) {
                    let mut updated = repo.clone();
                    let status = updated.status.get_or_insert_default();
                    status.state = SyncPhase::NoSync;
                    status.message = None;
                    self.repos.update_status(&updated).await?;
                }
                Ok(None)
            }
            SyncDecision::After(delay) => Ok(Some(delay)),
            SyncDecision::Due => self.run_sync(id, repo).await,
        }
    }

    async fn run_sync(&self, id: &str, repo: Repo) -> Result<Option<Duration>> {
        let mut updated = repo.clone();
        updated.status.get_or_insert_default().state = SyncPhase::Syncing;
        self.repos.update_status(&updated).await?;

        match self.synchronizer.sync(&repo).await {
            Ok(summary) => {
                let status = updated.status.get_or_insert_default();
                status.state = SyncPhase::Successful;
                status.message = Some(format!(
                    "synced: {} created, {} updated, {} deleted",
                    summary.created, summary.updated, summary.deleted
                ));
                status.last_update_time = Some(Utc::now());
                self.repos.update_status(&updated).await?;
                tracing::info!(repo = %repo.name_any(), "catalog sync succeeded");

                Ok(Some(Duration::from_secs(repo.spec.sync_period_seconds)))
            }
            Err(e) => {
                let status = updated.status.get_or_insert_default();
                status.state = SyncPhase::Failed;
                status.message = Some(e.to_string());
                self.repos.update_status(&updated).await?;
                // Surface the error so the queue retries with backoff
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_core::repo::{RepoSpec, RepoStatus};
    use caravel_repo::catalog::MemoryCatalog;
    use chrono::TimeDelta;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::stores::MemoryRepoStore;

    fn repo(url: String, period: u64) -> Repo {
        Repo::new(
            "bitnami",
            RepoSpec {
                url,
                credential: None,
                sync_period_seconds: period,
                description: None,
            },
        )
    }

    fn reconciler(
        repos: &MemoryRepoStore,
        catalog: &MemoryCatalog,
    ) -> RepoReconciler<MemoryCatalog> {
        RepoReconciler::new(
            Arc::new(repos.clone()),
            Synchronizer::new(catalog.clone()),
        )
    }

    #[tokio::test]
    async fn zero_period_lands_in_no_sync() {
        let repos = MemoryRepoStore::new();
        let catalog = MemoryCatalog::new();
        repos.insert(repo("https://charts.example.com".to_string(), 0));

        let requeue = reconciler(&repos, &catalog)
            .reconcile("bitnami")
            .await
            .unwrap();

        assert_eq!(requeue, None);
        assert_eq!(
            repos.snapshot("bitnami").unwrap().status.unwrap().state,
            SyncPhase::NoSync
        );
        assert_eq!(catalog.app_count(), 0);
    }

    #[tokio::test]
    async fn recent_sync_defers_until_period_elapses() {
        let repos = MemoryRepoStore::new();
        let catalog = MemoryCatalog::new();
        let mut r = repo("https://charts.example.com".to_string(), 600);
        r.status = Some(RepoStatus {
            state: SyncPhase::Successful,
            message: None,
            last_update_time: Some(Utc::now() - TimeDelta::seconds(100)),
        });
        repos.insert(r);

        let requeue = reconciler(&repos, &catalog)
            .reconcile("bitnami")
            .await
            .unwrap()
            .unwrap();

        assert!(requeue <= Duration::from_secs(500));
        assert!(requeue > Duration::from_secs(490));
        assert_eq!(repos.status_updates(), 0);
    }

    #[tokio::test]
    async fn due_sync_populates_catalog_and_reschedules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "apiVersion: v1\nentries:\n  nginx:\n    - name: nginx\n      version: \"1.0.0\"\n      digest: abc\n      urls:\n        - charts/nginx-1.0.0.tgz\n",
            ))
            .mount(&server)
            .await;

        let repos = MemoryRepoStore::new();
        let catalog = MemoryCatalog::new();
        repos.insert(repo(server.uri(), 300));

        let requeue = reconciler(&repos, &catalog)
            .reconcile("bitnami")
            .await
            .unwrap();

        assert_eq!(requeue, Some(Duration::from_secs(300)));
        assert_eq!(catalog.app_count(), 1);
        assert_eq!(catalog.version_count(), 1);

        let status = repos.snapshot("bitnami").unwrap().status.unwrap();
        assert_eq!(status.state, SyncPhase::Successful);
        assert!(status.last_update_time.is_some());
    }

    #[tokio::test]
    async fn failed_fetch_records_failure_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let repos = MemoryRepoStore::new();
        let catalog = MemoryCatalog::new();
        repos.insert(repo(server.uri(), 300));

        let result = reconciler(&repos, &catalog).reconcile("bitnami").await;
        assert!(result.is_err());

        let status = repos.snapshot("bitnami").unwrap().status.unwrap();
        assert_eq!(status.state, SyncPhase::Failed);
        assert!(status.message.is_some());
    }

    #[tokio::test]
    async fn deleted_repo_purges_its_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "apiVersion: v1\nentries:\n  nginx:\n    - name: nginx\n      version: \"1.0.0\"\n      digest: abc\n",
            ))
            .mount(&server)
            .await;

        let repos = MemoryRepoStore::new();
        let catalog = MemoryCatalog::new();
        repos.insert(repo(server.uri(), 300));

        let reconciler = reconciler(&repos, &catalog);
        reconciler.reconcile("bitnami").await.unwrap();
        assert_eq!(catalog.app_count(), 1);

        repos.request_delete("bitnami");
        let requeue = reconciler.reconcile("bitnami").await.unwrap();

        assert_eq!(requeue, None);
        assert_eq!(catalog.app_count(), 0);
        assert_eq!(catalog.version_count(), 0);
        assert!(!repos.exists("bitnami"));
    }

    #[tokio::test]
    async fn missing_repo_settles() {
        let repos = MemoryRepoStore::new();
        let catalog = MemoryCatalog::new();
        let requeue = reconciler(&repos, &catalog)
            .reconcile("nope")
            .await
            .unwrap();
        assert_eq!(requeue, None);
    }
}

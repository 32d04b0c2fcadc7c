//! Release lifecycle reconciler
//!
//! Drives an `ApplicationRelease` through its lifecycle using the resolved
//! executor. Reconciliation is idempotent: each pass observes the object,
//! performs the minimal converging action and either settles or asks for a
//! delayed re-delivery. A release whose desired state already matches the
//! observed state performs no writes.

use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;

use caravel_core::apps::ApplicationVersion;
use caravel_core::release::{
    ApplicationRelease, RECHECK_LIMIT, ReleasePhase, is_deadline_exceeded, spec_hash,
};
use caravel_kube::cluster::{ClusterHandle, ClusterResolver};
use caravel_kube::error::KubeError;
use caravel_kube::executor::{
    DeployRequest, DeployStatus, ExecutorFactory, JobPhase, ReleaseExecutor,
};
use caravel_repo::catalog::CatalogStore;
use caravel_store::fetch::PackageResolver;
use caravel_store::{ArtifactStore, StoreError};

use crate::error::Result;
use crate::stores::ReleaseStore;

/// Tight polling interval for in-flight deployments
pub const REQUEUE_SHORT: Duration = Duration::from_secs(5);

/// Interval between timeout rechecks
pub const REQUEUE_RECHECK: Duration = Duration::from_secs(600);

/// Reconciler for `ApplicationRelease` objects
pub struct ReleaseReconciler {
    releases: Arc<dyn ReleaseStore>,
    catalog: Arc<dyn CatalogStore>,
    clusters: Arc<dyn ClusterResolver>,
    executors: Arc<dyn ExecutorFactory>,
    packages: Arc<PackageResolver>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ReleaseReconciler {
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        catalog: Arc<dyn CatalogStore>,
        clusters: Arc<dyn ClusterResolver>,
        executors: Arc<dyn ExecutorFactory>,
        packages: Arc<PackageResolver>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            releases,
            catalog,
            clusters,
            executors,
            packages,
            artifacts,
        }
    }

    /// One reconcile pass. Returns the requeue-after delay, if any.
    pub async fn reconcile(&self, id: &str) -> Result<Option<Duration>> {
        let release = match self.releases.get(id).await? {
            Some(r) => r,
            None => return Ok(None),
        };

        let cluster_name = release.target_cluster().unwrap_or_default().to_string();
        let cluster = match self.clusters.get(&cluster_name).await {
            Ok(handle) if !handle.deleting => Some(handle),
            Ok(_) => None,
            Err(KubeError::ClusterNotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        let Some(cluster) = cluster else {
            // The release is moot without its cluster: terminal state, and a
            // pending deletion may proceed straight to garbage collection
            if release.metadata.deletion_timestamp.is_some() {
                self.releases.clear_finalizer(id).await?;
                return Ok(None);
            }
            if release.phase() != ReleasePhase::ClusterDeleted {
                let mut updated = release.clone();
                updated.status.get_or_insert_default().transition(
                    ReleasePhase::ClusterDeleted,
                    Some(format!("cluster '{}' no longer exists", cluster_name)),
                );
                self.releases.update_status(&updated).await?;
            }
            return Ok(None);
        };

        if release.metadata.deletion_timestamp.is_some() {
            return self.reconcile_delete(id, &release, &cluster).await;
        }

        // The uninstall path must always run before the object disappears
        self.releases.ensure_finalizer(id).await?;

        let live_hash = spec_hash(&release.spec);
        let phase = release.phase();

        // A changed spec forces re-entry into the upgrade path, whatever the
        // current phase reports
        if !matches!(phase, ReleasePhase::New | ReleasePhase::Creating | ReleasePhase::Upgrading)
            && release.recorded_spec_hash() != Some(live_hash.as_str())
        {
            let mut updated = release.clone();
            let status = updated.status.get_or_insert_default();
            status.spec_hash = Some(live_hash);
            status.recheck_count = 0;
            status.transition(ReleasePhase::Upgrading, None);
            self.releases.update_status(&updated).await?;
            return Ok(Some(Duration::ZERO));
        }

        match phase {
            ReleasePhase::New => {
                let mut updated = release.clone();
                let status = updated.status.get_or_insert_default();
                status.spec_hash = Some(live_hash);
                status.transition(ReleasePhase::Creating, None);
                self.releases.update_status(&updated).await?;
                Ok(Some(Duration::ZERO))
            }
            ReleasePhase::Creating | ReleasePhase::Upgrading => {
                self.deploy(id, &release, &cluster, phase, live_hash).await
            }
            ReleasePhase::Created | ReleasePhase::Timeout => {
                self.observe(id, &release, &cluster, phase).await
            }
            // Terminal until the spec changes or the object is deleted
            ReleasePhase::Active
            | ReleasePhase::Failed
            | ReleasePhase::DeployFailed
            | ReleasePhase::ClusterDeleted
            | ReleasePhase::Deleting => Ok(None),
        }
    }

    async fn executor_for(
        &self,
        release: &ApplicationRelease,
        cluster: &ClusterHandle,
    ) -> Result<Arc<dyn ReleaseExecutor>> {
        Ok(self
            .executors
            .executor(release.spec.app_type, cluster, release.target_namespace())
            .await?)
    }

    /// Install or upgrade through the executor and record the outcome.
    async fn deploy(
        &self,
        id: &str,
        release: &ApplicationRelease,
        cluster: &ClusterHandle,
        phase: ReleasePhase,
        live_hash: String,
    ) -> Result<Option<Duration>> {
        let mut updated = release.clone();
        let status = updated.status.get_or_insert_default();

        let version = match self.catalog.get_version(&release.spec.app_version_id).await? {
            Some(v) => v,
            None => {
                // Permanent validation failure: no retry until the spec changes
                status.transition(
                    ReleasePhase::Failed,
                    Some(format!(
                        "application version '{}' not found",
                        release.spec.app_version_id
                    )),
                );
                self.releases.update_status(&updated).await?;
                return Ok(None);
            }
        };

        let package = match self.resolve_package(&version).await {
            Ok(p) => p,
            Err(e) => {
                status.transition(ReleasePhase::Failed, Some(e.to_string()));
                self.releases.update_status(&updated).await?;
                return Ok(None);
            }
        };

        let request = DeployRequest {
            release_name: release.name_any(),
            namespace: release.target_namespace().to_string(),
            package,
            values: release.spec.values.clone(),
            spec_hash: live_hash.clone(),
        };

        let executor = self.executor_for(release, cluster).await?;
        let submitted = if phase == ReleasePhase::Creating {
            executor.install(&request).await
        } else {
            executor.upgrade(&request).await
        };

        match submitted {
            Ok(job) => {
                status.install_job_name = Some(job);
                status.spec_hash = Some(live_hash);
                status.transition(ReleasePhase::Created, None);
                self.releases.update_status(&updated).await?;
                Ok(Some(REQUEUE_SHORT))
            }
            Err(e) => {
                tracing::warn!(release = %id, error = %e, "deploy failed");
                status.transition(ReleasePhase::Failed, Some(e.to_string()));
                self.releases.update_status(&updated).await?;
                Ok(None)
            }
        }
    }

    /// Poll deployment progress for a release that has been submitted.
    async fn observe(
        &self,
        id: &str,
        release: &ApplicationRelease,
        cluster: &ClusterHandle,
        phase: ReleasePhase,
    ) -> Result<Option<Duration>> {
        let executor = self.executor_for(release, cluster).await?;
        let name = release.name_any();

        let deployed = match executor.get(&name).await {
            Ok(d) => d,
            Err(e) if e.is_not_found() => {
                // Not materialized: the install job tells us whether to keep
                // waiting or give up on this attempt
                return self.inspect_install_job(id, release, executor.as_ref()).await;
            }
            Err(e) => return Err(e.into()),
        };

        let mut updated = release.clone();
        let status = updated.status.get_or_insert_default();

        match deployed.status {
            DeployStatus::Deployed => {
                status.transition(ReleasePhase::Active, None);
                self.releases.update_status(&updated).await?;
                Ok(None)
            }
            DeployStatus::Failed => {
                let timed_out = is_deadline_exceeded(&deployed.description);
                if timed_out && status.recheck_count < RECHECK_LIMIT {
                    if phase != ReleasePhase::Timeout {
                        status.transition(
                            ReleasePhase::Timeout,
                            Some(deployed.description.clone()),
                        );
                        self.releases.update_status(&updated).await?;
                        return Ok(Some(REQUEUE_RECHECK));
                    }

                    // Deadline reports lag behind slow rollouts; probe the
                    // actual resources before giving up
                    let ready = executor.ready(&name).await?;
                    status.recheck_count += 1;
                    if ready {
                        status.transition(ReleasePhase::Active, None);
                        self.releases.update_status(&updated).await?;
                        Ok(None)
                    } else {
                        status.transition(
                            ReleasePhase::Timeout,
                            Some(deployed.description.clone()),
                        );
                        self.releases.update_status(&updated).await?;
                        Ok(Some(REQUEUE_RECHECK))
                    }
                } else {
                    status.transition(ReleasePhase::Failed, Some(deployed.description));
                    self.releases.update_status(&updated).await?;
                    Ok(None)
                }
            }
            DeployStatus::Pending | DeployStatus::Unknown => Ok(Some(REQUEUE_SHORT)),
        }
    }

    async fn inspect_install_job(
        &self,
        id: &str,
        release: &ApplicationRelease,
        executor: &dyn ReleaseExecutor,
    ) -> Result<Option<Duration>> {
        let job = release
            .status
            .as_ref()
            .and_then(|s| s.install_job_name.clone())
            .unwrap_or_default();

        let fail = |message: String| {
            let mut updated = release.clone();
            updated
                .status
                .get_or_insert_default()
                .transition(ReleasePhase::DeployFailed, Some(message));
            updated
        };

        match executor.job_phase(&job).await? {
            JobPhase::Missing if !job.is_empty() => {
                let updated = fail(format!("install job '{}' not found", job));
                self.releases.update_status(&updated).await?;
                Ok(None)
            }
            JobPhase::Failed => {
                let updated = fail(format!("install job '{}' failed beyond its retry budget", job));
                self.releases.update_status(&updated).await?;
                Ok(None)
            }
            _ => {
                tracing::debug!(release = %id, job = %job, "waiting for deployment to materialize");
                Ok(Some(REQUEUE_SHORT))
            }
        }
    }

    /// Two-phase delete: initiate the uninstall once, then poll its job and
    /// only release the finalizer after the job reaches a terminal phase.
    async fn reconcile_delete(
        &self,
        id: &str,
        release: &ApplicationRelease,
        cluster: &ClusterHandle,
    ) -> Result<Option<Duration>> {
        let executor = self.executor_for(release, cluster).await?;
        let name = release.name_any();

        if release.phase() != ReleasePhase::Deleting {
            let job = match executor.uninstall(&name).await {
                Ok(job) => job,
                Err(e) if e.is_not_found() => String::new(),
                Err(e) => return Err(e.into()),
            };

            // Best-effort cleanup of whatever this release staged in the
            // artifact store; failure must not block the finalizer
            if let Err(e) = self.artifacts.delete(std::slice::from_ref(&name)).await {
                tracing::warn!(release = %id, error = %e, "artifact cleanup failed");
            }

            let mut updated = release.clone();
            let status = updated.status.get_or_insert_default();
            status.uninstall_job_name = Some(job);
            status.transition(ReleasePhase::Deleting, None);
            self.releases.update_status(&updated).await?;
            return Ok(Some(REQUEUE_SHORT));
        }

        let job = release
            .status
            .as_ref()
            .and_then(|s| s.uninstall_job_name.clone())
            .unwrap_or_default();

        match executor.job_phase(&job).await? {
            JobPhase::Complete | JobPhase::Failed => {
                executor.remove_job(&job).await?;
                self.releases.clear_finalizer(id).await?;
                Ok(None)
            }
            JobPhase::Active | JobPhase::Missing => Ok(Some(REQUEUE_SHORT)),
        }
    }

    async fn resolve_package(&self, version: &ApplicationVersion) -> std::result::Result<bytes::Bytes, StoreError> {
        self.packages.resolve(version).await
    }
}

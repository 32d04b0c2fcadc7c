//! Release executor capability interface
//!
//! An executor performs the actual deployment work for one release in one
//! target (cluster, namespace). The reconciler never talks to the target
//! cluster directly; everything flows through this interface so the Helm
//! and raw-manifest paths stay interchangeable.

use async_trait::async_trait;
use bytes::Bytes;
use std::str::FromStr;
use std::sync::Arc;

use caravel_core::apps::AppType;

use crate::cluster::ClusterHandle;
use crate::error::Result;

/// One install/upgrade request handed to an executor
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Release name in the target cluster
    pub release_name: String,
    /// Target namespace
    pub namespace: String,
    /// Package payload: a chart archive for Helm types, a multi-document
    /// manifest bundle for raw types
    pub package: Bytes,
    /// User values document (YAML), Helm types only
    pub values: Option<String>,
    /// Hash of the release spec; drives deterministic job naming so
    /// re-submission with an unchanged spec is idempotent
    pub spec_hash: String,
}

/// Reported state of a deployed release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployStatus {
    /// Deployment finished successfully
    Deployed,
    /// Deployment failed; the description says why
    Failed,
    /// Install/upgrade/uninstall still in flight
    Pending,
    /// Anything else the deployment tool reports
    Unknown,
}

impl FromStr for DeployStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "deployed" | "superseded" => Self::Deployed,
            "failed" => Self::Failed,
            s if s.starts_with("pending") || s == "uninstalling" => Self::Pending,
            _ => Self::Unknown,
        })
    }
}

/// Observed release state in the target cluster
#[derive(Debug, Clone)]
pub struct DeployedRelease {
    pub status: DeployStatus,
    /// Human-readable description from the deployment tool
    pub description: String,
    /// Rendered manifest of the release
    pub manifest: String,
    /// Manifests of any hooks the release carries
    pub hook_manifests: Vec<String>,
}

/// Phase of an executor job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    /// Still running or not yet scheduled
    Active,
    Complete,
    /// Failed past its backoff budget
    Failed,
    /// Job object does not exist
    Missing,
}

/// Deployment capability for one release target.
#[async_trait]
pub trait ReleaseExecutor: Send + Sync {
    /// Observe the deployed release. `ReleaseNotFound` means it has not
    /// materialized yet.
    async fn get(&self, release: &str) -> Result<DeployedRelease>;

    /// Install the release; returns the name of the job performing the work
    /// (empty for synchronous executors).
    async fn install(&self, req: &DeployRequest) -> Result<String>;

    /// Upgrade the release; same contract as `install`.
    async fn upgrade(&self, req: &DeployRequest) -> Result<String>;

    /// Uninstall the release; not-found counts as already uninstalled.
    async fn uninstall(&self, release: &str) -> Result<String>;

    /// Probe readiness of every resource in the release manifest, hooks
    /// included. Not-found resources are definitively not ready.
    async fn ready(&self, release: &str) -> Result<bool>;

    /// Inspect an executor job by name.
    async fn job_phase(&self, job: &str) -> Result<JobPhase>;

    /// Delete an executor job; missing jobs are a no-op.
    async fn remove_job(&self, job: &str) -> Result<()>;
}

/// Builds executors per release target, dispatching on application type.
#[async_trait]
pub trait ExecutorFactory: Send + Sync {
    async fn executor(
        &self,
        app_type: AppType,
        cluster: &ClusterHandle,
        namespace: &str,
    ) -> Result<Arc<dyn ReleaseExecutor>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deploy_status_parsing() {
        assert_eq!("deployed".parse::<DeployStatus>().unwrap(), DeployStatus::Deployed);
        assert_eq!("failed".parse::<DeployStatus>().unwrap(), DeployStatus::Failed);
        assert_eq!(
            "pending-install".parse::<DeployStatus>().unwrap(),
            DeployStatus::Pending
        );
        assert_eq!(
            "pending-upgrade".parse::<DeployStatus>().unwrap(),
            DeployStatus::Pending
        );
        assert_eq!(
            "uninstalling".parse::<DeployStatus>().unwrap(),
            DeployStatus::Pending
        );
        assert_eq!(
            "something-new".parse::<DeployStatus>().unwrap(),
            DeployStatus::Unknown
        );
    }
}

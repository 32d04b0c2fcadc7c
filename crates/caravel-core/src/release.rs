//! Release objects and their lifecycle state machine
//!
//! An `ApplicationRelease` is one deployed instance of an
//! `ApplicationVersion` in one (cluster, namespace). Its `status.state`
//! moves strictly along the lifecycle graph driven by the release
//! reconciler; every transition is recorded together with a human-readable
//! message so callers observe failures by reading status.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::apps::AppType;
use crate::{CLUSTER_LABEL, NAMESPACE_LABEL};

/// Upper bound on timeout rechecks before a release is declared failed
pub const RECHECK_LIMIT: u32 = 4;

/// Lifecycle phase of a release
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ReleasePhase {
    /// Freshly created, no reconcile observed yet
    #[default]
    #[serde(rename = "")]
    New,
    Creating,
    Upgrading,
    Created,
    Active,
    Timeout,
    Failed,
    DeployFailed,
    Deleting,
    ClusterDeleted,
}

impl ReleasePhase {
    /// Phases that never leave on their own; only a spec change (or object
    /// deletion) moves the release again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Active | Self::Failed | Self::DeployFailed | Self::ClusterDeleted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "",
            Self::Creating => "Creating",
            Self::Upgrading => "Upgrading",
            Self::Created => "Created",
            Self::Active => "Active",
            Self::Timeout => "Timeout",
            Self::Failed => "Failed",
            Self::DeployFailed => "DeployFailed",
            Self::Deleting => "Deleting",
            Self::ClusterDeleted => "ClusterDeleted",
        }
    }
}

impl std::fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A deployed instance of one application version in one (cluster, namespace)
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "caravel.io",
    version = "v1alpha1",
    kind = "ApplicationRelease",
    plural = "applicationreleases",
    status = "ReleaseStatus",
    shortname = "apprls"
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    /// Packaging/deployment type, selects the executor
    #[serde(default)]
    pub app_type: AppType,

    /// Name of the source `ApplicationVersion`
    pub app_version_id: String,

    /// User-supplied values document (YAML), merged by the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    #[serde(default)]
    pub state: ReleasePhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Hash of the spec observed at the last install/upgrade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_job_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_job_name: Option<String>,

    /// Number of timeout rechecks performed, bounded by `RECHECK_LIMIT`
    #[serde(default)]
    pub recheck_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

impl ReleaseStatus {
    /// Move to a new phase, recording the message and update time.
    pub fn transition(&mut self, phase: ReleasePhase, message: impl Into<Option<String>>) {
        self.state = phase;
        self.message = message.into();
        self.last_update = Some(Utc::now());
    }
}

impl ApplicationRelease {
    /// Target cluster, carried as a label so releases can be listed per cluster.
    pub fn target_cluster(&self) -> Option<&str> {
        self.labels().get(CLUSTER_LABEL).map(String::as_str)
    }

    /// Target namespace inside the cluster.
    pub fn target_namespace(&self) -> &str {
        self.labels()
            .get(NAMESPACE_LABEL)
            .map(String::as_str)
            .unwrap_or("default")
    }

    pub fn phase(&self) -> ReleasePhase {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    pub fn recorded_spec_hash(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.spec_hash.as_deref())
    }
}

/// Stable hash of a release spec, used to detect drift between the deployed
/// configuration and the live object.
pub fn spec_hash(spec: &ReleaseSpec) -> String {
    // serde_json keys come out in struct order, so the encoding is stable
    let encoded = serde_json::to_vec(spec).unwrap_or_default();
    compute_digest(&encoded)
}

/// SHA256 digest of a byte payload, hex-encoded.
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Heuristic match on a deployment's failure description to distinguish a
/// deadline/timeout from other failures. This is a substring match on
/// human-readable text and therefore an approximation; it mirrors the
/// wording produced by Helm's wait machinery.
pub fn is_deadline_exceeded(description: &str) -> bool {
    let lower = description.to_lowercase();
    lower.contains("timed out") || lower.contains("deadline exceeded")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> ReleaseSpec {
        ReleaseSpec {
            app_type: AppType::Helm,
            app_version_id: "bitnami-nginx-15.0.0".to_string(),
            values: Some("replicaCount: 2\n".to_string()),
        }
    }

    #[test]
    fn spec_hash_is_stable_and_drift_sensitive() {
        let spec = sample_spec();
        assert_eq!(spec_hash(&spec), spec_hash(&spec.clone()));

        let mut changed = sample_spec();
        changed.values = Some("replicaCount: 3\n".to_string());
        assert_ne!(spec_hash(&spec), spec_hash(&changed));
    }

    #[test]
    fn deadline_heuristic_matches_helm_wording() {
        assert!(is_deadline_exceeded(
            "timed out waiting for the condition"
        ));
        assert!(is_deadline_exceeded("context deadline exceeded"));
        assert!(!is_deadline_exceeded("ImagePullBackOff on pod nginx-0"));
        assert!(!is_deadline_exceeded(""));
    }

    #[test]
    fn phase_serializes_new_as_empty() {
        assert_eq!(serde_json::to_string(&ReleasePhase::New).unwrap(), "\"\"");
        assert_eq!(
            serde_json::to_string(&ReleasePhase::ClusterDeleted).unwrap(),
            "\"ClusterDeleted\""
        );
        let parsed: ReleasePhase = serde_json::from_str("\"\"").unwrap();
        assert_eq!(parsed, ReleasePhase::New);
    }

    #[test]
    fn terminal_phases() {
        assert!(ReleasePhase::Active.is_terminal());
        assert!(ReleasePhase::Failed.is_terminal());
        assert!(ReleasePhase::ClusterDeleted.is_terminal());
        assert!(!ReleasePhase::Creating.is_terminal());
        assert!(!ReleasePhase::Timeout.is_terminal());
        assert!(!ReleasePhase::Deleting.is_terminal());
    }

    #[test]
    fn transition_records_message_and_time() {
        let mut status = ReleaseStatus::default();
        status.transition(ReleasePhase::Failed, Some("boom".to_string()));
        assert_eq!(status.state, ReleasePhase::Failed);
        assert_eq!(status.message.as_deref(), Some("boom"));
        assert!(status.last_update.is_some());
    }
}

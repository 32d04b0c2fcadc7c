//! Registered chart repositories and their sync schedule

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sync state of a repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SyncPhase {
    /// Not synchronized yet
    #[default]
    #[serde(rename = "")]
    Pending,
    Syncing,
    Successful,
    Failed,
    /// Synchronization disabled (zero period)
    NoSync,
}

/// Credential for a chart repository
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Skip TLS certificate verification when fetching the index
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

/// A registered chart repository
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "caravel.io",
    version = "v1alpha1",
    kind = "Repo",
    plural = "repos",
    status = "RepoStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RepoSpec {
    /// Index location: `http(s)://...` or `oci://...`
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<RepoCredential>,

    /// Seconds between catalog syncs; zero disables syncing
    #[serde(default)]
    pub sync_period_seconds: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepoStatus {
    #[serde(default)]
    pub state: SyncPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Time of the last successful sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,
}

/// Outcome of the sync-period gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Period is zero, never sync
    Disabled,
    /// Sync now
    Due,
    /// Period not yet elapsed, come back after this delay
    After(Duration),
}

impl Repo {
    /// Gate a sync attempt on the configured period: skipped entirely when
    /// the period is zero, and only re-run once the period has elapsed since
    /// the last success.
    pub fn sync_decision(&self, now: DateTime<Utc>) -> SyncDecision {
        let period = self.spec.sync_period_seconds;
        if period == 0 {
            return SyncDecision::Disabled;
        }

        let last = self.status.as_ref().and_then(|s| s.last_update_time);
        match last {
            None => SyncDecision::Due,
            Some(last) => {
                let elapsed = now.signed_duration_since(last).num_seconds().max(0) as u64;
                if elapsed >= period {
                    SyncDecision::Due
                } else {
                    SyncDecision::After(Duration::from_secs(period - elapsed))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn repo(period: u64, last: Option<DateTime<Utc>>) -> Repo {
        let mut repo = Repo::new(
            "bitnami",
            RepoSpec {
                url: "https://charts.bitnami.com/bitnami".to_string(),
                credential: None,
                sync_period_seconds: period,
                description: None,
            },
        );
        repo.status = Some(RepoStatus {
            state: SyncPhase::Successful,
            message: None,
            last_update_time: last,
        });
        repo
    }

    #[test]
    fn zero_period_disables_sync() {
        let now = Utc::now();
        assert_eq!(repo(0, Some(now)).sync_decision(now), SyncDecision::Disabled);
    }

    #[test]
    fn first_sync_is_due_immediately() {
        let now = Utc::now();
        assert_eq!(repo(300, None).sync_decision(now), SyncDecision::Due);
    }

    #[test]
    fn sync_waits_for_period_to_elapse() {
        let now = Utc::now();
        let last = now - TimeDelta::seconds(100);
        match repo(300, Some(last)).sync_decision(now) {
            SyncDecision::After(d) => assert_eq!(d, Duration::from_secs(200)),
            other => panic!("expected After, got {:?}", other),
        }

        let stale = now - TimeDelta::seconds(400);
        assert_eq!(repo(300, Some(stale)).sync_decision(now), SyncDecision::Due);
    }
}

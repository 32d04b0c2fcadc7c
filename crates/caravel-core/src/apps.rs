//! Catalog objects: applications and their immutable versions
//!
//! An `Application` is created per origin chart (or manifest bundle) and owns
//! a set of `ApplicationVersion` objects, one per published version. Both
//! carry a review state that only moves through explicit action requests.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// How an application is packaged and deployed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    /// Packaged Helm chart, deployed through the Helm job executor
    #[default]
    Helm,
    /// Raw manifest bundle, applied directly through the dynamic client
    Yaml,
    /// Manifest bundle targeted at edge nodes
    Edge,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helm => "helm",
            Self::Yaml => "yaml",
            Self::Edge => "edge",
        }
    }
}

impl std::fmt::Display for AppType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Review state of a catalog object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ReviewState {
    /// Newly created, not yet published
    #[default]
    Draft,
    /// Published and deployable
    Active,
    /// Withdrawn from the catalog, existing releases keep running
    Suspended,
}

impl ReviewState {
    /// Apply an explicit action request; any other combination is rejected.
    pub fn apply(self, action: AppAction) -> Result<ReviewState> {
        match (self, action) {
            (Self::Draft, AppAction::Release) => Ok(Self::Active),
            (Self::Active, AppAction::Suspend) => Ok(Self::Suspended),
            (Self::Suspended, AppAction::Recover) => Ok(Self::Active),
            (from, action) => Err(CoreError::InvalidTransition {
                from: format!("{:?}", from),
                action: format!("{:?}", action),
            }),
        }
    }
}

/// Explicit state-change request for a catalog object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppAction {
    Release,
    Suspend,
    Recover,
}

/// Chart maintainer
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Maintainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A catalog application, one per origin chart or manifest bundle
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "caravel.io",
    version = "v1alpha1",
    kind = "Application",
    plural = "applications",
    status = "ApplicationStatus",
    shortname = "app"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    /// Human-facing name as published by the chart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Icon URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Upstream home page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_home: Option<String>,

    /// Packaging/deployment type
    #[serde(default)]
    pub app_type: AppType,

    /// Short description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstraction: Option<String>,

    /// Blob-store keys of screenshots and other attachments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub state: ReviewState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

/// One immutable version of an application
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "caravel.io",
    version = "v1alpha1",
    kind = "ApplicationVersion",
    plural = "applicationversions",
    status = "ApplicationVersionStatus",
    shortname = "appver"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationVersionSpec {
    /// Original version string as published by the chart
    pub version_name: String,

    /// Packaging/deployment type
    #[serde(default)]
    pub app_type: AppType,

    /// Content digest of the package archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,

    /// Download URL for repo-sourced versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_url: Option<String>,

    /// Blob-store key for uploaded versions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// When the chart entry was published in its origin repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationVersionStatus {
    #[serde(default)]
    pub state: ReviewState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl ApplicationVersion {
    /// Whether this version came from a chart repository rather than an
    /// ad-hoc upload. Repo-sourced bytes are fetched from the origin,
    /// uploaded bytes from the artifact store.
    pub fn is_repo_sourced(&self) -> bool {
        self.spec.package_key.is_none() && self.spec.pull_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_transitions_follow_action_table() {
        assert_eq!(
            ReviewState::Draft.apply(AppAction::Release).unwrap(),
            ReviewState::Active
        );
        assert_eq!(
            ReviewState::Active.apply(AppAction::Suspend).unwrap(),
            ReviewState::Suspended
        );
        assert_eq!(
            ReviewState::Suspended.apply(AppAction::Recover).unwrap(),
            ReviewState::Active
        );
    }

    #[test]
    fn review_rejects_invalid_transitions() {
        assert!(ReviewState::Draft.apply(AppAction::Suspend).is_err());
        assert!(ReviewState::Draft.apply(AppAction::Recover).is_err());
        assert!(ReviewState::Active.apply(AppAction::Release).is_err());
        assert!(ReviewState::Suspended.apply(AppAction::Suspend).is_err());
    }

    #[test]
    fn repo_sourced_detection() {
        let mut ver = ApplicationVersion::new(
            "bitnami-nginx-15.0.0",
            ApplicationVersionSpec {
                version_name: "15.0.0".to_string(),
                app_type: AppType::Helm,
                digest: Some("abc".to_string()),
                pull_url: Some("https://charts.example.com/nginx-15.0.0.tgz".to_string()),
                package_key: None,
                description: None,
                icon: None,
                created: None,
                maintainers: vec![],
            },
        );
        assert!(ver.is_repo_sourced());

        ver.spec.package_key = Some("bitnami-nginx-15.0.0".to_string());
        assert!(!ver.is_repo_sourced());
    }

    #[test]
    fn app_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AppType::Helm).unwrap(), "\"helm\"");
        assert_eq!(serde_json::to_string(&AppType::Yaml).unwrap(), "\"yaml\"");
    }
}

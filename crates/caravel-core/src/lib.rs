//! Caravel Core - shared types for the Caravel release orchestration engine
//!
//! This crate provides the foundational types used throughout Caravel:
//! - `Application` / `ApplicationVersion`: the chart catalog objects
//! - `ApplicationRelease`: a deployed instance with its lifecycle state
//! - `Repo`: a registered chart repository and its sync schedule
//! - `ChartPackage`: parsing and digesting of packaged charts
//! - Name/version normalization helpers for DNS-safe identifiers

pub mod apps;
pub mod error;
pub mod names;
pub mod package;
pub mod release;
pub mod repo;

pub use apps::{
    AppAction, AppType, Application, ApplicationSpec, ApplicationStatus, ApplicationVersion,
    ApplicationVersionSpec, ApplicationVersionStatus, Maintainer, ReviewState,
};
pub use error::{CoreError, Result};
pub use names::{app_id, attachment_key, normalize_version, short_chart_id, version_id};
pub use package::{ChartDefinition, ChartPackage};
pub use release::{
    ApplicationRelease, ReleasePhase, ReleaseSpec, ReleaseStatus, RECHECK_LIMIT,
    compute_digest, is_deadline_exceeded, spec_hash,
};
pub use repo::{Repo, RepoCredential, RepoSpec, RepoStatus, SyncDecision, SyncPhase};

/// API group for all Caravel custom resources
pub const API_GROUP: &str = "caravel.io";

/// Label carrying the target cluster of a release
pub const CLUSTER_LABEL: &str = "caravel.io/cluster";

/// Label carrying the target namespace of a release
pub const NAMESPACE_LABEL: &str = "caravel.io/namespace";

/// Label linking a catalog object to the repo that produced it
pub const REPO_LABEL: &str = "caravel.io/repo";

/// Label linking a version to its parent application
pub const APP_LABEL: &str = "caravel.io/app";

/// Label linking a release to its source application version
pub const VERSION_LABEL: &str = "caravel.io/app-version";

/// Finalizer guarding release cleanup
pub const RELEASE_FINALIZER: &str = "caravel.io/release-cleanup";

/// Finalizer guarding catalog cleanup when a repo is removed
pub const REPO_FINALIZER: &str = "caravel.io/repo-cleanup";

//! Caravel Kube - cluster access and release executors
//!
//! This crate provides:
//! - **Cluster resolution**: the contract for turning a cluster name into
//!   clients and kubeconfig material (implemented elsewhere, consumed here)
//! - **Release executors**: a capability interface with two implementations,
//!   Helm-via-Job (delegates to a short-lived job running Helm inside the
//!   target cluster) and direct manifest application through the dynamic API
//! - **Readiness checks**: per-kind readiness evaluation for the resources a
//!   release produced, hooks included

pub mod cluster;
pub mod error;
pub mod executor;
pub mod factory;
pub mod helm_job;
pub mod manifest;
pub mod mock;
pub mod readiness;

pub use cluster::{ClusterHandle, ClusterResolver, ConnectionType, admin_kubeconfig};
pub use error::{KubeError, Result};
pub use executor::{
    DeployRequest, DeployStatus, DeployedRelease, ExecutorFactory, JobPhase, ReleaseExecutor,
};
pub use factory::StandardExecutorFactory;
pub use helm_job::HelmJobExecutor;
pub use manifest::ManifestExecutor;
pub use mock::{GetOutcome, MockClusterResolver, MockExecutor, MockExecutorFactory};
pub use readiness::{ResourceDoc, parse_documents};

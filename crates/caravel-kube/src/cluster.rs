//! Cluster client resolution contract
//!
//! Resolving a cluster name to clients and kubeconfig material is owned by
//! the surrounding platform; this crate only consumes the contract. The one
//! piece implemented here is reading a proxied cluster's admin kubeconfig
//! secret, which the Helm job needs when the connection is not direct.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Client;
use kube::api::Api;

use crate::error::{KubeError, Result};

/// How the control plane reaches a member cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// API server reachable directly; in-cluster credentials suffice
    Direct,
    /// Reached through an agent tunnel; operations need the stored admin
    /// kubeconfig
    Proxy,
}

/// Resolved cluster descriptor
#[derive(Debug, Clone)]
pub struct ClusterHandle {
    pub name: String,
    /// Raw kubeconfig for the cluster, as registered
    pub kubeconfig: Vec<u8>,
    pub connection: ConnectionType,
    /// Cluster object carries a deletion timestamp
    pub deleting: bool,
}

/// Resolves cluster names to clients and descriptors.
///
/// Implemented by the platform's cluster registry; injected into the
/// reconciler and executor factory.
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    /// Typed client for the cluster's API server.
    async fn runtime_client(&self, cluster: &str) -> Result<Client>;

    /// Descriptor with kubeconfig and connection type.
    async fn get(&self, cluster: &str) -> Result<ClusterHandle>;
}

/// Namespace on the host cluster holding per-cluster admin kubeconfigs
const KUBECONFIG_NAMESPACE: &str = "caravel-system";

/// Secret data key carrying the kubeconfig payload
const KUBECONFIG_KEY: &str = "kubeconfig";

/// Read the admin kubeconfig for a proxied cluster from its secret on the
/// host cluster. Direct connections do not need one.
pub async fn admin_kubeconfig(host: &Client, cluster: &str) -> Result<Vec<u8>> {
    let api: Api<Secret> = Api::namespaced(host.clone(), KUBECONFIG_NAMESPACE);
    let name = format!("{}-admin-kubeconfig", cluster);

    let secret = api.get(&name).await.map_err(|e| match e {
        kube::Error::Api(resp) if resp.code == 404 => KubeError::Kubeconfig {
            cluster: cluster.to_string(),
            message: format!("secret '{}' not found", name),
        },
        other => KubeError::Api(other),
    })?;

    secret
        .data
        .as_ref()
        .and_then(|d| d.get(KUBECONFIG_KEY))
        .map(|b| b.0.clone())
        .ok_or_else(|| KubeError::Kubeconfig {
            cluster: cluster.to_string(),
            message: format!("secret '{}' missing '{}' key", name, KUBECONFIG_KEY),
        })
}

//! Secret-backed cluster resolver
//!
//! Member clusters are registered as kubeconfig secrets in the system
//! namespace: `{cluster}-admin-kubeconfig` with a `kubeconfig` data key and
//! a `caravel.io/connection` label of `direct` or `proxy`.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use caravel_kube::cluster::{ClusterHandle, ClusterResolver, ConnectionType};
use caravel_kube::error::{KubeError, Result};

/// Label selecting the connection type of a registered cluster
const CONNECTION_LABEL: &str = "caravel.io/connection";

pub struct SecretClusterResolver {
    host: Client,
    namespace: String,
}

impl SecretClusterResolver {
    pub fn new(host: Client, namespace: impl Into<String>) -> Self {
        Self {
            host,
            namespace: namespace.into(),
        }
    }

    async fn secret(&self, cluster: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.host.clone(), &self.namespace);
        let name = format!("{}-admin-kubeconfig", cluster);
        match api.get(&name).await {
            Ok(secret) => Ok(secret),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(KubeError::ClusterNotFound {
                name: cluster.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClusterResolver for SecretClusterResolver {
    async fn runtime_client(&self, cluster: &str) -> Result<Client> {
        let handle = self.get(cluster).await?;

        let kubeconfig = Kubeconfig::from_yaml(
            std::str::from_utf8(&handle.kubeconfig).map_err(|e| KubeError::Kubeconfig {
                cluster: cluster.to_string(),
                message: format!("not UTF-8: {}", e),
            })?,
        )
        .map_err(|e| KubeError::Kubeconfig {
            cluster: cluster.to_string(),
            message: e.to_string(),
        })?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| KubeError::Kubeconfig {
                cluster: cluster.to_string(),
                message: e.to_string(),
            })?;

        Client::try_from(config).map_err(KubeError::Api)
    }

    async fn get(&self, cluster: &str) -> Result<ClusterHandle> {
        let secret = self.secret(cluster).await?;

        let kubeconfig = secret
            .data
            .as_ref()
            .and_then(|d| d.get("kubeconfig"))
            .map(|b| b.0.clone())
            .ok_or_else(|| KubeError::Kubeconfig {
                cluster: cluster.to_string(),
                message: "secret missing 'kubeconfig' key".to_string(),
            })?;

        let connection = secret
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CONNECTION_LABEL))
            .map(|v| {
                if v == "proxy" {
                    ConnectionType::Proxy
                } else {
                    ConnectionType::Direct
                }
            })
            .unwrap_or(ConnectionType::Direct);

        Ok(ClusterHandle {
            name: cluster.to_string(),
            kubeconfig,
            connection,
            deleting: secret.metadata.deletion_timestamp.is_some(),
        })
    }
}

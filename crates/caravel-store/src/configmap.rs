//! ConfigMap-backed small-object store
//!
//! Stores each blob as one ConfigMap in a dedicated namespace on the host
//! cluster. Payloads ride in `binaryData` under a single well-known key, so
//! no external object store is required for modest catalogs.

use async_trait::async_trait;
use bytes::Bytes;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, PostParams};
use std::collections::BTreeMap;

use crate::ArtifactStore;
use crate::error::{Result, StoreError};

/// Data key holding the payload inside each ConfigMap
const PAYLOAD_KEY: &str = "package";

/// ConfigMap small-object store
pub struct ConfigMapStore {
    client: Client,
    namespace: String,
}

impl ConfigMapStore {
    /// Create a store writing into the given namespace.
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn build_configmap(&self, key: &str, data: &Bytes) -> ConfigMap {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "caravel".to_string(),
        );
        labels.insert("caravel.io/artifact".to_string(), "true".to_string());

        let mut binary_data = BTreeMap::new();
        binary_data.insert(PAYLOAD_KEY.to_string(), ByteString(data.to_vec()));

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(key.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            binary_data: Some(binary_data),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ArtifactStore for ConfigMapStore {
    async fn read(&self, key: &str) -> Result<Bytes> {
        match self.api().get(key).await {
            Ok(cm) => cm
                .binary_data
                .as_ref()
                .and_then(|d| d.get(PAYLOAD_KEY))
                .map(|b| Bytes::from(b.0.clone()))
                .ok_or_else(|| StoreError::NotFound {
                    key: key.to_string(),
                }),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn upload(&self, key: &str, data: Bytes) -> Result<()> {
        let cm = self.build_configmap(key, &data);
        match self.api().create(&PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            // Content is immutable per key, so an existing blob is success
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let api = self.api();
        for key in keys {
            match api.delete(key, &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(resp)) if resp.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.api().get_opt(key).await {
            Ok(found) => Ok(found.is_some()),
            Err(e) => Err(e.into()),
        }
    }
}

//! Standard executor factory
//!
//! Dispatches on application type: Helm charts go through the job executor,
//! raw manifest types through the dynamic-apply executor. Proxied clusters
//! get the stored admin kubeconfig wired into the Helm job.

use async_trait::async_trait;
use std::sync::Arc;

use caravel_core::apps::AppType;

use crate::cluster::{ClusterHandle, ClusterResolver, ConnectionType, admin_kubeconfig};
use crate::error::Result;
use crate::executor::{ExecutorFactory, ReleaseExecutor};
use crate::helm_job::HelmJobExecutor;
use crate::manifest::ManifestExecutor;

/// Production executor factory
pub struct StandardExecutorFactory {
    resolver: Arc<dyn ClusterResolver>,
    /// Host-cluster client, used to read proxy kubeconfig secrets
    host: kube::Client,
    helm_image: String,
    service_account: Option<String>,
}

impl StandardExecutorFactory {
    pub fn new(
        resolver: Arc<dyn ClusterResolver>,
        host: kube::Client,
        helm_image: impl Into<String>,
    ) -> Self {
        Self {
            resolver,
            host,
            helm_image: helm_image.into(),
            service_account: None,
        }
    }

    pub fn with_service_account(mut self, name: impl Into<String>) -> Self {
        self.service_account = Some(name.into());
        self
    }
}

#[async_trait]
impl ExecutorFactory for StandardExecutorFactory {
    async fn executor(
        &self,
        app_type: AppType,
        cluster: &ClusterHandle,
        namespace: &str,
    ) -> Result<Arc<dyn ReleaseExecutor>> {
        let client = self.resolver.runtime_client(&cluster.name).await?;

        match app_type {
            AppType::Helm => {
                let mut executor =
                    HelmJobExecutor::new(client, namespace, self.helm_image.clone());
                if let Some(sa) = &self.service_account {
                    executor = executor.with_service_account(sa.clone());
                }
                if cluster.connection == ConnectionType::Proxy {
                    let kubeconfig = admin_kubeconfig(&self.host, &cluster.name).await?;
                    executor = executor.with_kubeconfig(kubeconfig);
                }
                Ok(Arc::new(executor))
            }
            AppType::Yaml | AppType::Edge => {
                Ok(Arc::new(ManifestExecutor::new(client, namespace).await?))
            }
        }
    }
}

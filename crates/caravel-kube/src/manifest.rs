//! Direct manifest executor for non-Helm application types
//!
//! Applies each document of the bundle with Server-Side Apply through the
//! dynamic API, resolving group/version/resource via discovery. Application
//! is synchronous from the caller's perspective, so no executor job exists;
//! install/uninstall return an empty job name and the empty job reports
//! complete.

use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy};
use kube::core::{GroupVersionKind, TypeMeta};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};

use crate::error::{KubeError, Result};
use crate::executor::{DeployRequest, DeployStatus, DeployedRelease, JobPhase, ReleaseExecutor};
use crate::readiness::{all_ready, parse_documents};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "caravel";

/// Parsed document ready for dynamic operations
struct ParsedResource {
    obj: DynamicObject,
    gvk: GroupVersionKind,
    api_resource: ApiResource,
    capabilities: ApiCapabilities,
}

impl ParsedResource {
    fn display_name(&self) -> String {
        let name = self.obj.metadata.name.as_deref().unwrap_or("unnamed");
        match &self.obj.metadata.namespace {
            Some(ns) => format!("{}/{}/{}", ns, self.gvk.kind, name),
            None => format!("{}/{}", self.gvk.kind, name),
        }
    }
}

/// Executor applying raw manifest bundles through the dynamic client
pub struct ManifestExecutor {
    client: Client,
    namespace: String,
    discovery: Discovery,
}

impl ManifestExecutor {
    /// Create an executor for one target (cluster, namespace). Discovery is
    /// run once up front and reused for every document.
    pub async fn new(client: Client, namespace: impl Into<String>) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            namespace: namespace.into(),
            discovery,
        })
    }

    fn parse_bundle(&self, bundle: &str) -> Result<Vec<ParsedResource>> {
        let mut resources = Vec::new();

        for (index, doc) in bundle.split("\n---").enumerate() {
            let doc = doc.trim().trim_start_matches("---").trim();
            if doc.is_empty()
                || doc
                    .lines()
                    .all(|l| l.trim().is_empty() || l.trim().starts_with('#'))
            {
                continue;
            }

            let resource = self.parse_single(doc).map_err(|e| {
                KubeError::InvalidManifest(format!("document {}: {}", index, e))
            })?;
            resources.push(resource);
        }

        Ok(resources)
    }

    fn parse_single(&self, doc: &str) -> Result<ParsedResource> {
        let mut obj: DynamicObject = serde_yaml::from_str(doc)
            .map_err(|e| KubeError::InvalidManifest(format!("YAML parse error: {}", e)))?;

        let type_meta = obj
            .types
            .as_ref()
            .ok_or_else(|| KubeError::InvalidManifest("missing apiVersion or kind".to_string()))?;
        let gvk = gvk_from_type_meta(type_meta);

        let (api_resource, capabilities) =
            self.discovery.resolve_gvk(&gvk).ok_or_else(|| {
                KubeError::InvalidManifest(format!(
                    "unknown resource type {}/{}",
                    type_meta.api_version, type_meta.kind
                ))
            })?;

        if capabilities.scope == Scope::Namespaced && obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(self.namespace.clone());
        }

        Ok(ParsedResource {
            obj,
            gvk,
            api_resource,
            capabilities,
        })
    }

    fn api_for(&self, resource: &ParsedResource) -> Api<DynamicObject> {
        if resource.capabilities.scope == Scope::Namespaced {
            let ns = resource
                .obj
                .metadata
                .namespace
                .as_deref()
                .unwrap_or(&self.namespace);
            Api::namespaced_with(self.client.clone(), ns, &resource.api_resource)
        } else {
            Api::all_with(self.client.clone(), &resource.api_resource)
        }
    }

    async fn apply_all(&self, resources: &[ParsedResource]) -> Result<()> {
        let mut sorted: Vec<&ParsedResource> = resources.iter().collect();
        sorted.sort_by_key(|r| apply_order(&r.gvk.kind));

        for resource in sorted {
            let name = resource.obj.metadata.name.as_deref().ok_or_else(|| {
                KubeError::InvalidManifest("resource missing metadata.name".to_string())
            })?;

            let mut params = PatchParams::apply(FIELD_MANAGER);
            params.force = true;

            self.api_for(resource)
                .patch(name, &params, &Patch::Apply(&resource.obj))
                .await
                .map_err(|e| {
                    KubeError::InvalidManifest(format!(
                        "failed to apply {}: {}",
                        resource.display_name(),
                        e
                    ))
                })?;
            tracing::debug!(resource = %resource.display_name(), "applied");
        }

        Ok(())
    }

    async fn delete_all(&self, resources: &[ParsedResource]) -> Result<()> {
        let mut sorted: Vec<&ParsedResource> = resources.iter().collect();
        sorted.sort_by_key(|r| std::cmp::Reverse(apply_order(&r.gvk.kind)));

        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        for resource in sorted {
            let name = resource.obj.metadata.name.as_deref().ok_or_else(|| {
                KubeError::InvalidManifest("resource missing metadata.name".to_string())
            })?;

            match self.api_for(resource).delete(name, &dp).await {
                Ok(_) => {}
                Err(kube::Error::Api(resp)) if resp.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    /// Presence of every document in the cluster counts as deployed; a
    /// missing one reports the release as not materialized.
    async fn observe(&self, resources: &[ParsedResource]) -> Result<DeployStatus> {
        for resource in resources {
            let name = resource.obj.metadata.name.as_deref().unwrap_or_default();
            if self.api_for(resource).get_opt(name).await?.is_none() {
                return Err(KubeError::ReleaseNotFound {
                    name: name.to_string(),
                    namespace: self.namespace.clone(),
                });
            }
        }
        Ok(DeployStatus::Deployed)
    }
}

#[async_trait]
impl ReleaseExecutor for ManifestExecutor {
    async fn get(&self, release: &str) -> Result<DeployedRelease> {
        // The release name maps to a bundle ConfigMap written at install time
        let bundle = self.load_bundle(release).await?;
        let resources = self.parse_bundle(&bundle)?;
        let status = self.observe(&resources).await?;

        Ok(DeployedRelease {
            status,
            description: "applied".to_string(),
            manifest: bundle,
            hook_manifests: Vec::new(),
        })
    }

    async fn install(&self, req: &DeployRequest) -> Result<String> {
        let bundle = String::from_utf8(req.package.to_vec())
            .map_err(|e| KubeError::InvalidManifest(format!("bundle not UTF-8: {}", e)))?;

        let resources = self.parse_bundle(&bundle)?;
        self.apply_all(&resources).await?;
        self.save_bundle(&req.release_name, &bundle).await?;

        // Synchronous application needs no job
        Ok(String::new())
    }

    async fn upgrade(&self, req: &DeployRequest) -> Result<String> {
        // Server-Side Apply converges updates the same way as installs
        self.install(req).await
    }

    async fn uninstall(&self, release: &str) -> Result<String> {
        let bundle = match self.load_bundle(release).await {
            Ok(b) => b,
            Err(e) if e.is_not_found() => return Ok(String::new()),
            Err(e) => return Err(e),
        };

        let resources = self.parse_bundle(&bundle)?;
        self.delete_all(&resources).await?;
        self.drop_bundle(release).await?;
        Ok(String::new())
    }

    async fn ready(&self, release: &str) -> Result<bool> {
        let bundle = self.load_bundle(release).await?;
        let docs = parse_documents(&bundle);
        all_ready(&self.client, &self.namespace, &docs).await
    }

    async fn job_phase(&self, job: &str) -> Result<JobPhase> {
        // No jobs exist for manifest releases; the empty name converges
        if job.is_empty() {
            Ok(JobPhase::Complete)
        } else {
            Ok(JobPhase::Missing)
        }
    }

    async fn remove_job(&self, _job: &str) -> Result<()> {
        Ok(())
    }
}

impl ManifestExecutor {
    fn bundle_key(release: &str) -> String {
        format!("{}-bundle", release)
    }

    async fn save_bundle(&self, release: &str, bundle: &str) -> Result<()> {
        use k8s_openapi::api::core::v1::ConfigMap;
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
        use kube::api::PostParams;
        use std::collections::BTreeMap;

        let mut data = BTreeMap::new();
        data.insert("bundle".to_string(), bundle.to_string());
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "caravel".to_string(),
        );

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(Self::bundle_key(release)),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        match api.create(&PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                api.replace(&Self::bundle_key(release), &PostParams::default(), &cm)
                    .await
                    .map(|_| ())
                    .map_err(KubeError::Api)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn load_bundle(&self, release: &str) -> Result<String> {
        use k8s_openapi::api::core::v1::ConfigMap;

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        match api.get(&Self::bundle_key(release)).await {
            Ok(cm) => cm
                .data
                .as_ref()
                .and_then(|d| d.get("bundle"))
                .cloned()
                .ok_or_else(|| KubeError::ReleaseNotFound {
                    name: release.to_string(),
                    namespace: self.namespace.clone(),
                }),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Err(KubeError::ReleaseNotFound {
                name: release.to_string(),
                namespace: self.namespace.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn drop_bundle(&self, release: &str) -> Result<()> {
        use k8s_openapi::api::core::v1::ConfigMap;

        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        match api
            .delete(&Self::bundle_key(release), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Creation order by kind: prerequisites before dependents. Deletion runs in
/// reverse.
fn apply_order(kind: &str) -> u8 {
    match kind {
        "CustomResourceDefinition" => 0,
        "Namespace" => 1,
        "ServiceAccount" | "ClusterRole" | "ClusterRoleBinding" | "Role" | "RoleBinding" => 2,
        "ConfigMap" | "Secret" => 3,
        "Service" | "Ingress" | "NetworkPolicy" => 4,
        "Deployment" | "StatefulSet" | "DaemonSet" | "Job" | "CronJob" | "Pod" => 5,
        _ => 6,
    }
}

/// Convert TypeMeta to GroupVersionKind: "apps/v1" splits into group and
/// version, bare "v1" is the core group.
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

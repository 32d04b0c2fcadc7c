//! Helm-via-Job executor
//!
//! Install/upgrade/uninstall are delegated to a short-lived, bounded-retry
//! Job running the Helm CLI inside the target cluster. The chart archive,
//! values and (for proxied clusters) the admin kubeconfig are staged in a
//! Secret mounted into the job pod. Release observation reads Helm's own
//! storage Secrets, so no Helm binary runs in this process.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::read::GzDecoder;
use k8s_openapi::ByteString;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, PodSpec, PodTemplateSpec, Secret, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;

use crate::error::{KubeError, Result};
use crate::executor::{
    DeployRequest, DeployStatus, DeployedRelease, JobPhase, ReleaseExecutor,
};
use crate::readiness::{all_ready, parse_documents};

/// Retry budget for executor jobs
const JOB_BACKOFF_LIMIT: i32 = 3;

/// Upper bound on staged package size; one Secret must hold it
const MAX_STAGE_SIZE: usize = 1_000_000;

/// Mount path of the staging secret inside the job pod
const STAGE_MOUNT: &str = "/caravel";

/// Helm's install deadline inside the job
const HELM_TIMEOUT: &str = "10m";

/// Executor that drives Helm through in-cluster jobs
pub struct HelmJobExecutor {
    client: Client,
    namespace: String,
    helm_image: String,
    service_account: Option<String>,
    /// Admin kubeconfig for proxied clusters; direct connections rely on the
    /// job's service account
    kubeconfig: Option<Vec<u8>>,
}

impl HelmJobExecutor {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        helm_image: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            helm_image: helm_image.into(),
            service_account: None,
            kubeconfig: None,
        }
    }

    pub fn with_service_account(mut self, name: impl Into<String>) -> Self {
        self.service_account = Some(name.into());
        self
    }

    pub fn with_kubeconfig(mut self, kubeconfig: Vec<u8>) -> Self {
        self.kubeconfig = Some(kubeconfig);
        self
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Stage payload files into a Secret; an existing secret with the same
    /// name is accepted because names are derived from content hashes.
    async fn stage(&self, name: &str, entries: BTreeMap<String, Vec<u8>>) -> Result<()> {
        let total: usize = entries.values().map(Vec::len).sum();
        if total > MAX_STAGE_SIZE {
            return Err(KubeError::PackageTooLarge {
                size: total,
                max: MAX_STAGE_SIZE,
            });
        }

        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "caravel".to_string(),
        );

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            data: Some(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, ByteString(v)))
                    .collect(),
            ),
            ..Default::default()
        };

        match self.secrets().create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn build_job(&self, name: &str, stage_secret: &str, args: Vec<String>) -> Job {
        build_helm_job(
            &self.namespace,
            &self.helm_image,
            self.service_account.as_deref(),
            name,
            stage_secret,
            args,
        )
    }

    async fn submit_deploy(&self, req: &DeployRequest) -> Result<String> {
        let short = &req.spec_hash[..req.spec_hash.len().min(8)];
        let job_name = format!("{}-install-{}", req.release_name, short);
        let secret_name = format!("{}-pkg-{}", req.release_name, short);

        let mut entries = BTreeMap::new();
        entries.insert("chart.tgz".to_string(), req.package.to_vec());
        if let Some(values) = &req.values {
            entries.insert("values.yaml".to_string(), values.clone().into_bytes());
        }
        if let Some(kubeconfig) = &self.kubeconfig {
            entries.insert("kubeconfig".to_string(), kubeconfig.clone());
        }
        self.stage(&secret_name, entries).await?;

        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            req.release_name.clone(),
            format!("{}/chart.tgz", STAGE_MOUNT),
            "--namespace".to_string(),
            req.namespace.clone(),
            "--create-namespace".to_string(),
            "--wait".to_string(),
            "--timeout".to_string(),
            HELM_TIMEOUT.to_string(),
        ];
        if req.values.is_some() {
            args.push("-f".to_string());
            args.push(format!("{}/values.yaml", STAGE_MOUNT));
        }
        if self.kubeconfig.is_some() {
            args.push("--kubeconfig".to_string());
            args.push(format!("{}/kubeconfig", STAGE_MOUNT));
        }

        let job = self.build_job(&job_name, &secret_name, args);
        match self.jobs().create(&PostParams::default(), &job).await {
            Ok(_) => {}
            // Same spec hash means the same work was already submitted
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                tracing::debug!(job = %job_name, "install job already submitted");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(job_name)
    }

    /// Newest Helm storage secret for a release, by revision label.
    async fn latest_release_secret(&self, release: &str) -> Result<Option<Secret>> {
        let selector = format!("owner=helm,name={}", release);
        let lp = ListParams::default().labels(&selector);
        let secrets = self.secrets().list(&lp).await?;

        let newest = secrets.items.into_iter().max_by_key(|s| {
            s.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("version"))
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(0)
        });
        Ok(newest)
    }
}

#[async_trait]
impl ReleaseExecutor for HelmJobExecutor {
    async fn get(&self, release: &str) -> Result<DeployedRelease> {
        let secret = self
            .latest_release_secret(release)
            .await?
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: release.to_string(),
                namespace: self.namespace.clone(),
            })?;

        let status = secret
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get("status"))
            .map(|s| s.parse().unwrap_or(DeployStatus::Unknown))
            .unwrap_or(DeployStatus::Unknown);

        // The payload is optional detail; a decode failure still yields the
        // label-derived status
        let payload = secret
            .data
            .as_ref()
            .and_then(|d| d.get("release"))
            .and_then(|b| decode_release_payload(&b.0).ok());

        let (description, manifest, hook_manifests) = match payload {
            Some(doc) => (
                doc.info.map(|i| i.description).unwrap_or_default(),
                doc.manifest,
                doc.hooks.into_iter().map(|h| h.manifest).collect(),
            ),
            None => (String::new(), String::new(), Vec::new()),
        };

        Ok(DeployedRelease {
            status,
            description,
            manifest,
            hook_manifests,
        })
    }

    async fn install(&self, req: &DeployRequest) -> Result<String> {
        self.submit_deploy(req).await
    }

    async fn upgrade(&self, req: &DeployRequest) -> Result<String> {
        // `helm upgrade --install` covers both directions
        self.submit_deploy(req).await
    }

    async fn uninstall(&self, release: &str) -> Result<String> {
        let job_name = format!("{}-uninstall", release);

        let mut args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            self.namespace.clone(),
        ];

        let secret_name = format!("{}-uninstall-cfg", release);
        let mut entries = BTreeMap::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            entries.insert("kubeconfig".to_string(), kubeconfig.clone());
            args.push("--kubeconfig".to_string());
            args.push(format!("{}/kubeconfig", STAGE_MOUNT));
        }
        self.stage(&secret_name, entries).await?;

        let job = self.build_job(&job_name, &secret_name, args);
        match self.jobs().create(&PostParams::default(), &job).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 409 => {}
            Err(e) => return Err(e.into()),
        }

        Ok(job_name)
    }

    async fn ready(&self, release: &str) -> Result<bool> {
        let deployed = self.get(release).await?;

        let mut docs = parse_documents(&deployed.manifest);
        for hook in &deployed.hook_manifests {
            docs.extend(parse_documents(hook));
        }

        all_ready(&self.client, &self.namespace, &docs).await
    }

    async fn job_phase(&self, job: &str) -> Result<JobPhase> {
        if job.is_empty() {
            return Ok(JobPhase::Missing);
        }

        let found = match self.jobs().get_opt(job).await? {
            Some(j) => j,
            None => return Ok(JobPhase::Missing),
        };

        let status = found.status.unwrap_or_default();
        if status.succeeded.unwrap_or(0) > 0 {
            return Ok(JobPhase::Complete);
        }
        let failed_terminally = status
            .conditions
            .unwrap_or_default()
            .iter()
            .any(|c| c.type_ == "Failed" && c.status == "True");
        if failed_terminally {
            return Ok(JobPhase::Failed);
        }
        Ok(JobPhase::Active)
    }

    async fn remove_job(&self, job: &str) -> Result<()> {
        if job.is_empty() {
            return Ok(());
        }
        let dp = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match self.jobs().delete(job, &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Assemble the bounded-retry job running the Helm CLI against a mounted
/// payload secret.
fn build_helm_job(
    namespace: &str,
    helm_image: &str,
    service_account: Option<&str>,
    name: &str,
    stage_secret: &str,
    args: Vec<String>,
) -> Job {
    let mut labels = BTreeMap::new();
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "caravel".to_string(),
    );
    labels.insert("caravel.io/executor".to_string(), "helm".to_string());

    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(JOB_BACKOFF_LIMIT),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    service_account_name: service_account.map(String::from),
                    containers: vec![Container {
                        name: "helm".to_string(),
                        image: Some(helm_image.to_string()),
                        command: Some(vec!["helm".to_string()]),
                        args: Some(args),
                        volume_mounts: Some(vec![VolumeMount {
                            name: "payload".to_string(),
                            mount_path: STAGE_MOUNT.to_string(),
                            read_only: Some(true),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    volumes: Some(vec![Volume {
                        name: "payload".to_string(),
                        secret: Some(SecretVolumeSource {
                            secret_name: Some(stage_secret.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Minimal view of Helm's stored release document
#[derive(Debug, Deserialize)]
struct HelmReleaseDoc {
    #[serde(default)]
    info: Option<HelmReleaseInfo>,
    #[serde(default)]
    manifest: String,
    #[serde(default)]
    hooks: Vec<HelmHook>,
}

#[derive(Debug, Deserialize)]
struct HelmReleaseInfo {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct HelmHook {
    #[serde(default)]
    manifest: String,
}

/// Decode Helm's storage payload: base64 text wrapping a gzipped JSON
/// document.
fn decode_release_payload(data: &[u8]) -> Result<HelmReleaseDoc> {
    let text = std::str::from_utf8(data)
        .map_err(|e| KubeError::Serialization(format!("release payload not UTF-8: {}", e)))?;
    let compressed = BASE64
        .decode(text.trim())
        .map_err(|e| KubeError::Serialization(format!("release payload base64: {}", e)))?;

    let mut json = Vec::new();
    GzDecoder::new(std::io::Cursor::new(&compressed))
        .read_to_end(&mut json)
        .map_err(|e| KubeError::Serialization(format!("release payload gzip: {}", e)))?;

    serde_json::from_slice(&json)
        .map_err(|e| KubeError::Serialization(format!("release payload JSON: {}", e)))
}

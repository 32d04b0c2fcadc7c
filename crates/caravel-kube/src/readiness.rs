//! Per-kind resource readiness evaluation
//!
//! A release is ready when every resource its manifest (and hook manifests)
//! produced is ready. Workload kinds are judged by replica arithmetic, jobs
//! by completion, and everything else is trivially ready. A resource that
//! does not exist is definitively not ready, not retryable: install steps
//! are strictly ordered, so a missing object means an earlier step failed.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use kube::Client;
use kube::api::Api;

use crate::error::Result;

/// Identity of one manifest document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDoc {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

/// Parse a multi-document YAML manifest into resource identities. Documents
/// without apiVersion/kind/name (comments, empty) are skipped.
pub fn parse_documents(manifest: &str) -> Vec<ResourceDoc> {
    let mut docs = Vec::new();

    for doc in manifest.split("\n---") {
        let doc = doc.trim().trim_start_matches("---").trim();
        if doc.is_empty() {
            continue;
        }

        let value: serde_yaml::Value = match serde_yaml::from_str(doc) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let api_version = value.get("apiVersion").and_then(|v| v.as_str());
        let kind = value.get("kind").and_then(|v| v.as_str());
        let metadata = value.get("metadata");
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(|v| v.as_str());
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(|v| v.as_str());

        if let (Some(api_version), Some(kind), Some(name)) = (api_version, kind, name) {
            docs.push(ResourceDoc {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.map(|s| s.to_string()),
            });
        }
    }

    docs
}

/// Check one resource. Workload kinds require existence plus readiness;
/// other kinds are trivially ready.
pub async fn resource_ready(
    client: &Client,
    default_namespace: &str,
    doc: &ResourceDoc,
) -> Result<bool> {
    let ns = doc.namespace.as_deref().unwrap_or(default_namespace);

    match doc.kind.as_str() {
        "Deployment" => {
            let api: Api<Deployment> = Api::namespaced(client.clone(), ns);
            match api.get_opt(&doc.name).await? {
                Some(d) => Ok(deployment_ready(&d)),
                None => Ok(false),
            }
        }
        "StatefulSet" => {
            let api: Api<StatefulSet> = Api::namespaced(client.clone(), ns);
            match api.get_opt(&doc.name).await? {
                Some(s) => Ok(statefulset_ready(&s)),
                None => Ok(false),
            }
        }
        "DaemonSet" => {
            let api: Api<DaemonSet> = Api::namespaced(client.clone(), ns);
            match api.get_opt(&doc.name).await? {
                Some(d) => Ok(daemonset_ready(&d)),
                None => Ok(false),
            }
        }
        "Job" => {
            let api: Api<Job> = Api::namespaced(client.clone(), ns);
            match api.get_opt(&doc.name).await? {
                Some(j) => Ok(job_complete(&j)),
                None => Ok(false),
            }
        }
        _ => Ok(true),
    }
}

/// Walk a set of documents; the first not-ready resource short-circuits.
pub async fn all_ready(
    client: &Client,
    default_namespace: &str,
    docs: &[ResourceDoc],
) -> Result<bool> {
    for doc in docs {
        if !resource_ready(client, default_namespace, doc).await? {
            tracing::debug!(kind = %doc.kind, name = %doc.name, "resource not ready");
            return Ok(false);
        }
    }
    Ok(true)
}

pub fn deployment_ready(d: &Deployment) -> bool {
    let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = match d.status.as_ref() {
        Some(s) => s,
        None => return desired == 0,
    };
    status.updated_replicas.unwrap_or(0) >= desired && status.ready_replicas.unwrap_or(0) >= desired
}

pub fn statefulset_ready(s: &StatefulSet) -> bool {
    let desired = s.spec.as_ref().and_then(|sp| sp.replicas).unwrap_or(1);
    let status = match s.status.as_ref() {
        Some(st) => st,
        None => return desired == 0,
    };
    status.updated_replicas.unwrap_or(0) >= desired && status.ready_replicas.unwrap_or(0) >= desired
}

pub fn daemonset_ready(d: &DaemonSet) -> bool {
    let status = match d.status.as_ref() {
        Some(s) => s,
        None => return false,
    };
    status.number_ready >= status.desired_number_scheduled
}

pub fn job_complete(j: &Job) -> bool {
    j.status
        .as_ref()
        .and_then(|s| s.succeeded)
        .unwrap_or(0)
        > 0
}

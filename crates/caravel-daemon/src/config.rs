//! Daemon configuration
//!
//! Loaded from a YAML file; every field has a workable default so a bare
//! `caravel-daemon` starts against the current kubeconfig with ConfigMap
//! artifact storage only.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    /// Namespace on the host cluster for artifact ConfigMaps and cluster
    /// kubeconfig secrets
    pub system_namespace: String,

    /// Image used by Helm executor jobs
    pub helm_image: String,

    /// Service account for Helm executor jobs on directly-connected clusters
    pub helm_service_account: Option<String>,

    /// Worker pool size for release reconciliation
    pub release_workers: usize,

    /// Worker pool size for repository sync
    pub repo_workers: usize,

    /// Delay before retrying a failed watch stream
    #[serde(with = "humantime_serde")]
    pub watch_retry: Duration,

    /// Optional S3-compatible large-object store
    pub object_store: Option<ObjectStoreConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            system_namespace: "caravel-system".to_string(),
            helm_image: "alpine/helm:3.14.4".to_string(),
            helm_service_account: None,
            release_workers: 4,
            repo_workers: 2,
            watch_retry: Duration::from_secs(5),
            object_store: None,
        }
    }
}

/// S3-compatible object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreConfig {
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub force_path_style: bool,

    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default)]
    pub access_key: Option<String>,

    #[serde(default)]
    pub secret_key: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl DaemonConfig {
    /// Load configuration from a YAML file.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let config = DaemonConfig::default();
        assert_eq!(config.system_namespace, "caravel-system");
        assert!(config.object_store.is_none());
        assert!(config.release_workers > 0);
    }

    #[test]
    fn loads_yaml_with_object_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "systemNamespace: platform\nwatchRetry: 10s\nobjectStore:\n  bucket: charts\n  endpoint: http://minio:9000\n  forcePathStyle: true\n"
        )
        .unwrap();

        let config = DaemonConfig::load_from(file.path()).unwrap();
        assert_eq!(config.system_namespace, "platform");
        assert_eq!(config.watch_retry, Duration::from_secs(10));
        let store = config.object_store.unwrap();
        assert_eq!(store.bucket, "charts");
        assert!(store.force_path_style);
        // Unspecified fields keep their defaults
        assert_eq!(config.helm_image, "alpine/helm:3.14.4");
    }
}

//! Origin package fetching
//!
//! Repo-sourced catalog versions are not persisted locally; their bytes come
//! straight from the origin pull URL or OCI reference. Uploaded versions are
//! read from the tiered store instead.

use bytes::Bytes;
use kube::ResourceExt;
use oci_distribution::Reference;
use oci_distribution::client::{Client as OciClient, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use std::time::Duration;

use caravel_core::ApplicationVersion;
use caravel_core::release::compute_digest;

use crate::ArtifactStore;
use crate::error::{Result, StoreError};
use crate::tiered::TieredStore;

/// Media types for Helm charts in OCI registries
mod media_types {
    pub const HELM_CONFIG: &str = "application/vnd.cncf.helm.config.v1+json";
    pub const HELM_CONTENT: &str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";
}

/// Request timeout for chart downloads; large charts take a while
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(180);

/// Downloads package archives from HTTP(S) URLs and OCI references
pub struct PackageFetcher {
    http: reqwest::Client,
}

impl PackageFetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Fetch {
                location: "<client>".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { http })
    }

    /// Fetch a package from its pull location (`http(s)://` or `oci://`).
    pub async fn fetch(&self, location: &str) -> Result<Bytes> {
        if location.starts_with("oci://") {
            self.fetch_oci(location).await
        } else {
            self.fetch_http(location).await
        }
    }

    async fn fetch_http(&self, url: &str) -> Result<Bytes> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| StoreError::Fetch {
                location: url.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(StoreError::Fetch {
                location: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }

        response.bytes().await.map_err(|e| StoreError::Fetch {
            location: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn fetch_oci(&self, reference: &str) -> Result<Bytes> {
        let clean = reference.trim_start_matches("oci://");
        let parsed = Reference::try_from(clean).map_err(|e| StoreError::Fetch {
            location: reference.to_string(),
            message: format!("invalid OCI reference: {}", e),
        })?;

        let client = OciClient::new(ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        });

        let image = client
            .pull(
                &parsed,
                &RegistryAuth::Anonymous,
                vec![media_types::HELM_CONFIG, media_types::HELM_CONTENT],
            )
            .await
            .map_err(|e| StoreError::Fetch {
                location: reference.to_string(),
                message: e.to_string(),
            })?;

        let layer = image
            .layers
            .into_iter()
            .find(|l| l.media_type == media_types::HELM_CONTENT)
            .ok_or_else(|| StoreError::Fetch {
                location: reference.to_string(),
                message: "no chart content layer in manifest".to_string(),
            })?;

        Ok(Bytes::from(layer.data))
    }
}

/// Resolves an `ApplicationVersion` to its package bytes.
///
/// Uploaded versions read the tiered store under the version's blob key;
/// repo-sourced versions bypass the stores and fetch from the origin,
/// verifying the recorded digest when present.
pub struct PackageResolver {
    store: TieredStore,
    fetcher: PackageFetcher,
}

impl PackageResolver {
    pub fn new(store: TieredStore, fetcher: PackageFetcher) -> Self {
        Self { store, fetcher }
    }

    pub async fn resolve(&self, version: &ApplicationVersion) -> Result<Bytes> {
        if version.is_repo_sourced() {
            let url = version.spec.pull_url.as_deref().ok_or_else(|| {
                StoreError::NoPackageSource {
                    name: version.name_any(),
                }
            })?;
            let data = self.fetcher.fetch(url).await?;

            if let Some(expected) = version.spec.digest.as_deref() {
                let actual = compute_digest(&data);
                if !digest_matches(expected, &actual) {
                    return Err(StoreError::DigestMismatch {
                        key: version.name_any(),
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
            return Ok(data);
        }

        // The catalog version's name doubles as the blob key
        let key = version
            .spec
            .package_key
            .clone()
            .unwrap_or_else(|| version.name_any());
        if key.is_empty() {
            return Err(StoreError::NoPackageSource {
                name: version.name_any(),
            });
        }
        self.store.read(&key).await
    }
}

/// Compare digests tolerating `sha256:` / `sha256-` prefixes and case.
fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        d.trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    };
    normalize(expected) == normalize(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryStore;
    use caravel_core::apps::{AppType, ApplicationVersionSpec};
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn version(name: &str, pull_url: Option<String>, package_key: Option<String>) -> ApplicationVersion {
        ApplicationVersion::new(
            name,
            ApplicationVersionSpec {
                version_name: "1.0.0".to_string(),
                app_type: AppType::Helm,
                digest: None,
                pull_url,
                package_key,
                description: None,
                icon: None,
                created: None,
                maintainers: vec![],
            },
        )
    }

    #[test]
    fn digest_comparison_is_prefix_tolerant() {
        assert!(digest_matches("sha256:ABC123", "abc123"));
        assert!(digest_matches("sha256-abc123", "sha256:abc123"));
        assert!(!digest_matches("sha256:abc123", "def456"));
    }

    #[tokio::test]
    async fn uploaded_version_reads_the_store() {
        let small = Arc::new(MemoryStore::new());
        small
            .upload("demo-1.0.0", Bytes::from_static(b"chart-bytes"))
            .await
            .unwrap();

        let resolver = PackageResolver::new(
            TieredStore::small_only(small),
            PackageFetcher::new().unwrap(),
        );
        let v = version("demo-1.0.0", None, Some("demo-1.0.0".to_string()));
        assert_eq!(
            resolver.resolve(&v).await.unwrap(),
            Bytes::from_static(b"chart-bytes")
        );
    }

    #[tokio::test]
    async fn repo_sourced_version_bypasses_the_store() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/charts/demo-1.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remote-bytes".to_vec()))
            .mount(&server)
            .await;

        let resolver = PackageResolver::new(
            TieredStore::small_only(Arc::new(MemoryStore::new())),
            PackageFetcher::new().unwrap(),
        );
        let v = version(
            "demo-1.0.0",
            Some(format!("{}/charts/demo-1.0.0.tgz", server.uri())),
            None,
        );
        assert_eq!(
            resolver.resolve(&v).await.unwrap(),
            Bytes::from_static(b"remote-bytes")
        );
    }

    #[tokio::test]
    async fn digest_mismatch_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/charts/demo-1.0.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
            .mount(&server)
            .await;

        let resolver = PackageResolver::new(
            TieredStore::small_only(Arc::new(MemoryStore::new())),
            PackageFetcher::new().unwrap(),
        );
        let mut v = version(
            "demo-1.0.0",
            Some(format!("{}/charts/demo-1.0.0.tgz", server.uri())),
            None,
        );
        v.spec.digest = Some("sha256:0000".to_string());

        assert!(matches!(
            resolver.resolve(&v).await,
            Err(StoreError::DigestMismatch { .. })
        ));
    }
}

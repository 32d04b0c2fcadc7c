//! Index fetching
//!
//! HTTP(S) repositories serve a Helm `index.yaml` next to their base URL;
//! `oci://` repositories have no index document, so their tag listing is
//! turned into one, with the manifest digest standing in for the archive
//! digest.

use oci_distribution::Reference;
use oci_distribution::client::{Client as OciClient, ClientConfig, ClientProtocol};
use oci_distribution::secrets::RegistryAuth;
use std::time::Duration;

use caravel_core::repo::Repo;

use crate::error::{RepoError, Result};
use crate::index::{ChartEntry, RepositoryIndex};

/// Request timeout for index documents; they are small
const INDEX_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches repository indexes over HTTP(S) or OCI
#[derive(Default)]
pub struct IndexFetcher;

impl IndexFetcher {
    pub fn new() -> Self {
        Self
    }

    /// Fetch and parse the index for a repository.
    pub async fn fetch(&self, repo: &Repo) -> Result<RepositoryIndex> {
        if repo.spec.url.starts_with("oci://") {
            self.fetch_oci(repo).await
        } else {
            self.fetch_http(repo).await
        }
    }

    async fn fetch_http(&self, repo: &Repo) -> Result<RepositoryIndex> {
        let index_url = format!("{}/index.yaml", repo.spec.url.trim_end_matches('/'));

        let mut builder = reqwest::Client::builder().timeout(INDEX_TIMEOUT);
        let credential = repo.spec.credential.as_ref();
        if credential.map(|c| c.insecure_skip_tls_verify).unwrap_or(false) {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build()?;

        let mut request = client.get(&index_url);
        if let Some(cred) = credential {
            if let Some(username) = &cred.username {
                request = request.basic_auth(username, cred.password.as_deref());
            }
        }

        let response = request.send().await?;
        if response.status().as_u16() == 404 {
            return Err(RepoError::IndexNotFound { url: index_url });
        }
        if !response.status().is_success() {
            return Err(RepoError::Http {
                url: index_url,
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        RepositoryIndex::from_bytes(&bytes)
    }

    /// Build an index from an OCI repository's tag listing. The chart name
    /// is the last path segment of the reference; each tag becomes one
    /// version whose digest is the manifest digest.
    async fn fetch_oci(&self, repo: &Repo) -> Result<RepositoryIndex> {
        let clean = repo.spec.url.trim_start_matches("oci://");
        let reference =
            Reference::try_from(format!("{}:latest", clean).as_str()).map_err(|e| {
                RepoError::InvalidUrl {
                    url: repo.spec.url.clone(),
                    reason: e.to_string(),
                }
            })?;

        let auth = match repo.spec.credential.as_ref() {
            Some(cred) if cred.username.is_some() => RegistryAuth::Basic(
                cred.username.clone().unwrap_or_default(),
                cred.password.clone().unwrap_or_default(),
            ),
            _ => RegistryAuth::Anonymous,
        };

        let client = OciClient::new(ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        });

        let tags = client
            .list_tags(&reference, &auth, None, None)
            .await
            .map_err(|e| RepoError::Oci {
                message: format!("failed to list tags: {}", e),
            })?;

        let chart_name = clean
            .rsplit('/')
            .next()
            .unwrap_or(clean)
            .to_string();

        let mut entries = Vec::new();
        for tag in tags.tags {
            let tagged = Reference::try_from(format!("{}:{}", clean, tag).as_str())
                .map_err(|e| RepoError::Oci {
                    message: e.to_string(),
                })?;
            let digest = client
                .fetch_manifest_digest(&tagged, &auth)
                .await
                .map_err(|e| RepoError::Oci {
                    message: format!("failed to fetch digest for tag {}: {}", tag, e),
                })?;

            entries.push(ChartEntry {
                name: chart_name.clone(),
                version: tag.clone(),
                digest: Some(digest),
                urls: vec![format!("oci://{}:{}", clean, tag)],
                ..Default::default()
            });
        }

        let mut index = RepositoryIndex::default();
        index.entries.insert(chart_name, entries);
        Ok(index)
    }
}

/// Resolve a chart download URL against the repo base URL unless it is
/// already absolute.
pub fn resolve_pull_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") || url.starts_with("oci://") {
        url.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), url.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caravel_core::repo::{RepoCredential, RepoSpec};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn repo(url: String, credential: Option<RepoCredential>) -> Repo {
        Repo::new(
            "test",
            RepoSpec {
                url,
                credential,
                sync_period_seconds: 300,
                description: None,
            },
        )
    }

    #[test]
    fn pull_url_resolution() {
        assert_eq!(
            resolve_pull_url("https://charts.example.com", "charts/nginx-1.0.0.tgz"),
            "https://charts.example.com/charts/nginx-1.0.0.tgz"
        );
        assert_eq!(
            resolve_pull_url(
                "https://charts.example.com/",
                "https://cdn.example.com/nginx-1.0.0.tgz"
            ),
            "https://cdn.example.com/nginx-1.0.0.tgz"
        );
        assert_eq!(
            resolve_pull_url("https://charts.example.com", "oci://ghcr.io/org/nginx:1.0.0"),
            "oci://ghcr.io/org/nginx:1.0.0"
        );
    }

    #[tokio::test]
    async fn fetches_http_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "apiVersion: v1\nentries:\n  nginx:\n    - name: nginx\n      version: \"1.0.0\"\n      digest: abc\n",
            ))
            .mount(&server)
            .await;

        let index = IndexFetcher::new()
            .fetch(&repo(server.uri(), None))
            .await
            .unwrap();
        assert_eq!(index.entries["nginx"][0].digest.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn sends_basic_credentials() {
        let server = MockServer::start().await;
        // "user:pass" base64
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("apiVersion: v1\n"))
            .mount(&server)
            .await;

        let credential = RepoCredential {
            username: Some("user".to_string()),
            password: Some("pass".to_string()),
            insecure_skip_tls_verify: false,
        };
        let index = IndexFetcher::new()
            .fetch(&repo(server.uri(), Some(credential)))
            .await
            .unwrap();
        assert!(index.entries.is_empty());
    }

    #[tokio::test]
    async fn missing_index_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.yaml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = IndexFetcher::new()
            .fetch(&repo(server.uri(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::IndexNotFound { .. }));
    }
}

//! Repository index model
//!
//! Helm-compatible `index.yaml` parsing, reduced to the fields the catalog
//! records. Upstream indexes routinely publish the same semantic version
//! more than once (rebuilt charts); `collapse_versions` keeps only the most
//! recently created entry per version.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use caravel_core::apps::Maintainer;
use caravel_core::names::normalize_version;

use crate::error::{RepoError, Result};

/// Repository index document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default)]
    pub api_version: String,

    #[serde(default)]
    pub generated: Option<DateTime<Utc>>,

    /// Charts indexed by name
    #[serde(default)]
    pub entries: HashMap<String, Vec<ChartEntry>>,
}

impl RepositoryIndex {
    /// Parse an index from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParse {
            message: e.to_string(),
        })
    }

    /// Parse an index from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParse {
            message: format!("invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }
}

/// Chart entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,

    /// Version string as published (semver by convention)
    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    #[serde(default)]
    pub maintainers: Vec<Maintainer>,

    /// Download URLs for the chart archive
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl ChartEntry {
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }
}

/// Collapse duplicate version entries to the most recently created one per
/// semantic version. Output is sorted newest version first.
pub fn collapse_versions(entries: &[ChartEntry]) -> Vec<ChartEntry> {
    let mut by_version: HashMap<String, &ChartEntry> = HashMap::new();

    for entry in entries {
        let key = normalize_version(&entry.version);
        match by_version.get(&key) {
            Some(existing) if existing.created >= entry.created => {}
            _ => {
                by_version.insert(key, entry);
            }
        }
    }

    let mut collapsed: Vec<ChartEntry> = by_version.into_values().cloned().collect();
    collapsed.sort_by(|a, b| {
        match (a.parsed_version(), b.parsed_version()) {
            (Some(va), Some(vb)) => vb.cmp(&va),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.version.cmp(&a.version),
        }
    });
    collapsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(version: &str, created: Option<DateTime<Utc>>, digest: &str) -> ChartEntry {
        ChartEntry {
            name: "nginx".to_string(),
            version: version.to_string(),
            digest: Some(digest.to_string()),
            created,
            ..Default::default()
        }
    }

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn parses_helm_index() {
        let yaml = r#"
apiVersion: v1
generated: "2025-06-30T08:15:00Z"
entries:
  kafka:
    - name: kafka
      version: "26.4.2"
      appVersion: "3.6.1"
      description: Distributed event streaming
      urls:
        - https://repo.invalid/packages/kafka-26.4.2.tgz
      digest: "f00d"
    - name: kafka
      version: "25.0.0"
      urls:
        - packages/kafka-25.0.0.tgz
  vault:
    - name: vault
      version: "0.27.0"
      urls:
        - https://repo.invalid/packages/vault-0.27.0.tgz
"#;
        let index = RepositoryIndex::from_yaml(yaml).unwrap();
        assert_eq!(index.entries.len(), 2);
        assert_eq!(index.entries["kafka"].len(), 2);
        assert_eq!(
            index.entries["kafka"][0].download_url(),
            Some("https://repo.invalid/packages/kafka-26.4.2.tgz")
        );
    }

    #[test]
    fn collapse_keeps_newest_created_per_version() {
        let entries = vec![
            entry("1.0.0", Some(at(100)), "old"),
            entry("1.0.0", Some(at(200)), "new"),
            entry("2.0.0", None, "two"),
        ];

        let collapsed = collapse_versions(&entries);
        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].version, "2.0.0");
        assert_eq!(collapsed[1].digest.as_deref(), Some("new"));
    }

    #[test]
    fn collapse_sorts_semver_descending() {
        let entries = vec![
            entry("1.2.0", None, "a"),
            entry("1.10.0", None, "b"),
            entry("1.9.0", None, "c"),
        ];
        let collapsed = collapse_versions(&entries);
        let versions: Vec<&str> = collapsed.iter().map(|e| e.version.as_str()).collect();
        assert_eq!(versions, vec!["1.10.0", "1.9.0", "1.2.0"]);
    }

    #[test]
    fn empty_index_parses() {
        let index = RepositoryIndex::from_yaml("apiVersion: v1\n").unwrap();
        assert!(index.entries.is_empty());
    }
}

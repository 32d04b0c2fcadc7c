//! Packaged chart handling
//!
//! Uploaded packages arrive as gzipped tar archives. Validation extracts the
//! chart definition (`Chart.yaml`) and computes the content digest that keys
//! the catalog entry.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tar::Archive;

use crate::apps::Maintainer;
use crate::error::{CoreError, Result};
use crate::release::compute_digest;

/// Chart definition fields carried in `Chart.yaml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDefinition {
    pub name: String,
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
}

/// A parsed chart package: its definition plus the digest of the raw bytes
#[derive(Debug, Clone)]
pub struct ChartPackage {
    pub definition: ChartDefinition,
    pub digest: String,
}

impl ChartPackage {
    /// Parse a `.tgz` chart archive, locating `Chart.yaml` at the top level
    /// of the packaged directory.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let gz = GzDecoder::new(std::io::Cursor::new(data));
        let mut archive = Archive::new(gz);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?;

            // Charts package as `<name>/Chart.yaml`; ignore subchart copies
            let is_chart_yaml = path.components().count() == 2
                && path
                    .file_name()
                    .map(|f| f == "Chart.yaml")
                    .unwrap_or(false);
            if !is_chart_yaml {
                continue;
            }

            let mut raw = String::new();
            entry.read_to_string(&mut raw)?;
            let definition: ChartDefinition =
                serde_yaml::from_str(&raw).map_err(|e| CoreError::InvalidPackage {
                    message: format!("malformed Chart.yaml: {}", e),
                })?;

            if definition.name.is_empty() {
                return Err(CoreError::MissingField {
                    field: "name".to_string(),
                });
            }
            if definition.version.is_empty() {
                return Err(CoreError::MissingField {
                    field: "version".to_string(),
                });
            }

            return Ok(Self {
                definition,
                digest: compute_digest(data),
            });
        }

        Err(CoreError::InvalidPackage {
            message: "archive contains no Chart.yaml".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn package_with(chart_yaml: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let data = chart_yaml.as_bytes();
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "nginx/Chart.yaml", data)
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn parses_chart_definition_and_digest() {
        let data = package_with(
            "name: nginx\nversion: 15.0.0\nappVersion: \"1.25\"\ndescription: web server\n",
        );
        let pkg = ChartPackage::parse(&data).unwrap();
        assert_eq!(pkg.definition.name, "nginx");
        assert_eq!(pkg.definition.version, "15.0.0");
        assert_eq!(pkg.definition.app_version.as_deref(), Some("1.25"));
        assert_eq!(pkg.digest, compute_digest(&data));
    }

    #[test]
    fn rejects_archive_without_chart_yaml() {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let data = b"just a readme";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "nginx/README.md", &data[..])
            .unwrap();
        let archive = builder.into_inner().unwrap().finish().unwrap();

        assert!(matches!(
            ChartPackage::parse(&archive),
            Err(CoreError::InvalidPackage { .. })
        ));
    }

    #[test]
    fn rejects_missing_version() {
        let data = package_with("name: nginx\nversion: \"\"\n");
        assert!(matches!(
            ChartPackage::parse(&data),
            Err(CoreError::MissingField { .. })
        ));
    }
}

//! DNS-safe identifier derivation
//!
//! Chart names and version strings arrive from arbitrary upstream indexes and
//! must become Kubernetes object names: lowercase RFC 1123 labels. Strings
//! that are already valid pass through; anything else collapses to a
//! truncated content hash so the mapping stays stable across syncs.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::release::compute_digest;

/// Truncation length for hash-derived identifiers
const SHORT_HASH_LEN: usize = 10;

/// Longest identifier we will emit; leaves room for suffixes within the
/// 253-char object-name limit.
const MAX_NAME_LEN: usize = 63;

static DNS_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").unwrap());

fn is_dns_safe(s: &str) -> bool {
    !s.is_empty() && s.len() <= MAX_NAME_LEN && DNS_LABEL.is_match(s)
}

/// Short, stable identifier for a chart name: the name itself when already
/// DNS-safe, otherwise a truncated content hash.
pub fn short_chart_id(chart_name: &str) -> String {
    if is_dns_safe(chart_name) {
        chart_name.to_string()
    } else {
        compute_digest(chart_name.as_bytes())[..SHORT_HASH_LEN].to_string()
    }
}

/// Catalog identifier for a chart within a repo: `{repo}-{shortChartId}`.
pub fn app_id(repo_name: &str, chart_name: &str) -> String {
    format!("{}-{}", repo_name, short_chart_id(chart_name))
}

/// Normalize a version string to a DNS-safe form usable inside object names.
///
/// Versions like `1.0.0` pass through; `1.0.0+build.1` or `V2_beta` are
/// lowercased with invalid runs replaced by `-`, and fall back to a hash when
/// nothing salvageable remains.
pub fn normalize_version(version: &str) -> String {
    let lowered = version.to_lowercase();
    if is_dns_safe(&lowered) {
        return lowered;
    }

    let mut out = String::with_capacity(lowered.len());
    let mut last_dash = false;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' {
            out.push(c);
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    let out = out.trim_matches(|c| c == '-' || c == '.').to_string();

    if is_dns_safe(&out) {
        out
    } else {
        format!("v-{}", &compute_digest(version.as_bytes())[..SHORT_HASH_LEN])
    }
}

/// Object name for an application version: `{appId}-{normalizedVersion}`.
pub fn version_id(app_id: &str, version: &str) -> String {
    format!("{}-{}", app_id, normalize_version(version))
}

/// Blob key for an uploaded attachment: a caller-supplied tag prefixing a
/// generated id.
pub fn attachment_key(tag: &str) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let id: String = (0..12)
        .map(|_| {
            let n: u8 = rng.random_range(0..16);
            char::from_digit(n as u32, 16).unwrap_or('0')
        })
        .collect();
    format!("{}-{}", tag, id)
}

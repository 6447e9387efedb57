//! Version pinning: collapsing a version request to one concrete version.

use crate::error::ResolveError;
use crate::spec::VersionRequest;
use semver::{Version, VersionReq};
use std::collections::BTreeMap;

/// The slice of registry metadata needed to pin a version request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    /// Package name as published.
    pub name: String,
    /// Dist-tag -> version map (`latest` is the one that matters here).
    pub dist_tags: BTreeMap<String, String>,
    /// All published version strings.
    pub versions: Vec<String>,
}

impl PackageMetadata {
    /// Extract metadata from a registry packument.
    ///
    /// Missing or malformed fields are left empty; pinning against them
    /// reports `VersionNotFound` rather than failing here.
    #[must_use]
    pub fn from_packument(name: &str, packument: &serde_json::Value) -> Self {
        let name = packument
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(name)
            .to_string();

        let dist_tags = packument
            .get("dist-tags")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(tag, v)| v.as_str().map(|s| (tag.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let versions = packument
            .get("versions")
            .and_then(|v| v.as_object())
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();

        Self {
            name,
            dist_tags,
            versions,
        }
    }

    /// The version behind the `latest` dist-tag, if published.
    #[must_use]
    pub fn latest(&self) -> Option<&str> {
        self.dist_tags.get("latest").map(String::as_str)
    }
}

/// Pin a version request to a concrete published version.
///
/// # Rules
/// - `Latest` pins to `dist-tags.latest`
/// - `Exact` pins to that version if published, else falls through as a range
/// - `Range` pins to the highest satisfying version
/// - Supports OR ranges like `^1.0.0 || ^2.0.0` and x-ranges like `1.x`
///
/// # Errors
/// Returns an error if no published version satisfies the request or the
/// range syntax is invalid.
pub fn pin_version(
    metadata: &PackageMetadata,
    request: &VersionRequest,
) -> Result<String, ResolveError> {
    match request {
        VersionRequest::Latest => {
            metadata
                .latest()
                .map(String::from)
                .ok_or_else(|| ResolveError::VersionNotFound {
                    name: metadata.name.clone(),
                    request: "latest (no dist-tags.latest found)".to_string(),
                })
        }
        VersionRequest::Exact(exact) => {
            let text = exact.to_string();
            if metadata.versions.iter().any(|v| *v == text) {
                return Ok(text);
            }
            // Exact version not published, try as a range
            pin_range(metadata, &text)
        }
        VersionRequest::Range(range) => pin_range(metadata, range),
    }
}

fn pin_range(metadata: &PackageMetadata, range: &str) -> Result<String, ResolveError> {
    let mut published: Vec<Version> = metadata
        .versions
        .iter()
        .filter_map(|v| Version::parse(v).ok())
        .collect();

    // Sort descending so the first match is the highest
    published.sort_by(|a, b| b.cmp(a));

    if range.contains("||") {
        return pin_or_range(&metadata.name, range, &published);
    }

    let req = parse_range(range)?;
    for version in &published {
        if req.matches(version) {
            return Ok(version.to_string());
        }
    }

    Err(ResolveError::VersionNotFound {
        name: metadata.name.clone(),
        request: range.to_string(),
    })
}

/// Pin an OR range like `^1.0.0 || ^2.0.0` to the highest version
/// matching any alternative.
fn pin_or_range(name: &str, range: &str, published: &[Version]) -> Result<String, ResolveError> {
    let mut reqs: Vec<VersionReq> = Vec::new();
    for alternative in range.split("||").map(str::trim) {
        if alternative.is_empty() {
            continue;
        }
        // Skip alternatives that do not parse; the others may still match
        if let Ok(req) = parse_range(alternative) {
            reqs.push(req);
        }
    }

    if reqs.is_empty() {
        return Err(ResolveError::parse(
            range,
            "version range has no valid alternatives",
        ));
    }

    for version in published {
        if reqs.iter().any(|req| req.matches(version)) {
            return Ok(version.to_string());
        }
    }

    Err(ResolveError::VersionNotFound {
        name: name.to_string(),
        request: range.to_string(),
    })
}

/// Parse a single version range, handling npm-specific syntax.
///
/// Handles hyphen ranges (`1.0.0 - 2.0.0`), x-ranges (`1.x`, `*`), and
/// space-separated AND comparators (`>= 2.1.2 < 3.0.0`) on top of the
/// standard semver grammar.
fn parse_range(range: &str) -> Result<VersionReq, ResolveError> {
    let range = range.trim();

    let converted = if let Some((start, end)) = split_hyphen_range(range) {
        format!(">={start}, <={end}")
    } else if range.contains(['x', 'X']) || range == "*" {
        convert_x_range(range)
    } else {
        normalize_comparators(range)
    };

    VersionReq::parse(&converted)
        .map_err(|e| ResolveError::parse(range, format!("invalid version range: {e}")))
}

/// Split a hyphen range like `1.0.0 - 2.0.0` into its endpoints.
fn split_hyphen_range(range: &str) -> Option<(&str, &str)> {
    let (start, end) = range.split_once(" - ")?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() || end.contains(" - ") {
        return None;
    }
    Some((start, end))
}

/// Rewrite npm's space-separated AND comparators with commas.
///
/// npm accepts `>= 2.1.2 < 3.0.0`; the semver crate wants
/// `>=2.1.2, <3.0.0`. Bare operators are re-attached to the version
/// token that follows them.
fn normalize_comparators(range: &str) -> String {
    let mut out = String::new();
    let mut pending_op: Option<&str> = None;

    for token in range.split_whitespace() {
        if is_bare_operator(token) {
            pending_op = Some(token);
            continue;
        }
        if !out.is_empty() {
            out.push_str(", ");
        }
        if let Some(op) = pending_op.take() {
            out.push_str(op);
        }
        out.push_str(token);
    }

    // A trailing operator with no version; let semver report it
    if let Some(op) = pending_op {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(op);
    }

    if out.is_empty() {
        range.to_string()
    } else {
        out
    }
}

fn is_bare_operator(token: &str) -> bool {
    matches!(token, ">=" | "<=" | ">" | "<" | "=" | "^" | "~")
}

/// Convert an npm x-range (`1.x`, `1.2.x`, `*`) to a semver range.
fn convert_x_range(range: &str) -> String {
    if matches!(range, "*" | "x" | "X") {
        return ">=0.0.0".to_string();
    }

    let parts: Vec<&str> = range.split('.').collect();
    match parts.as_slice() {
        [major, "x" | "X" | "*"] => {
            if let Ok(m) = major.parse::<u64>() {
                return format!(">={m}.0.0, <{}.0.0", m + 1);
            }
        }
        [major, minor, "x" | "X" | "*"] => {
            if let (Ok(m), Ok(n)) = (major.parse::<u64>(), minor.parse::<u64>()) {
                return format!(">={m}.{n}.0, <{m}.{}.0", n + 1);
            }
        }
        _ => {}
    }

    // Fallback: just replace x with 0
    range.replace(['x', 'X'], "0")
}

//! Module specifier parsing.
//!
//! Parses specifiers like:
//! - `react`
//! - `react@latest`
//! - `ink@4.4.1`
//! - `ink@4.4.1/build/index.js`
//! - `@scope/name@^2.0.0/dist/mod.js`

use crate::error::ResolveError;
use semver::Version;
use std::fmt;

/// The version portion of a specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRequest {
    /// No version given, or the literal `latest` tag.
    Latest,
    /// A concrete version like `4.4.1`.
    Exact(Version),
    /// A semver range like `^18.0.0` or `1.x`.
    Range(String),
}

impl VersionRequest {
    fn parse(text: &str) -> Self {
        if text == "latest" {
            return Self::Latest;
        }
        match Version::parse(text) {
            Ok(version) => Self::Exact(version),
            Err(_) => Self::Range(text.to_string()),
        }
    }

    /// True when pinning this request needs no package metadata.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

impl fmt::Display for VersionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Exact(version) => write!(f, "{version}"),
            Self::Range(range) => f.write_str(range),
        }
    }
}

/// A parsed module specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpecifier {
    /// Full package name (e.g., "@scope/name" or "name").
    pub name: String,
    /// Requested version (latest when omitted).
    pub version: VersionRequest,
    /// Path into the package, kept verbatim (e.g., "build/index.js").
    pub subpath: Option<String>,
}

impl PackageSpecifier {
    /// Parse a specifier string of the form `name[@version][/subpath]`.
    ///
    /// # Errors
    /// Returns an error if the specifier is malformed.
    pub fn parse(input: &str) -> Result<Self, ResolveError> {
        let input = input.trim();

        if input.is_empty() {
            return Err(ResolveError::parse(input, "empty specifier"));
        }

        if input.starts_with('@') {
            Self::parse_scoped(input)
        } else {
            Self::parse_unscoped(input)
        }
    }

    fn parse_scoped(input: &str) -> Result<Self, ResolveError> {
        // Must have at least @scope/name
        let Some(slash_pos) = input.find('/') else {
            return Err(ResolveError::parse(
                input,
                "scoped specifier is missing '/'",
            ));
        };

        if slash_pos == 1 {
            return Err(ResolveError::parse(input, "empty scope"));
        }

        let scope = &input[1..slash_pos];
        validate_name_part(input, scope)?;

        let (name, version, subpath) = split_parts(input, &input[slash_pos + 1..])?;
        validate_name_part(input, name)?;

        Ok(Self {
            name: format!("@{scope}/{name}"),
            version,
            subpath,
        })
    }

    fn parse_unscoped(input: &str) -> Result<Self, ResolveError> {
        let (name, version, subpath) = split_parts(input, input)?;
        validate_name_part(input, name)?;

        Ok(Self {
            name: name.to_string(),
            version,
            subpath,
        })
    }

    /// Check if this is a scoped package.
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.name.starts_with('@')
    }
}

impl fmt::Display for PackageSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)?;
        if let Some(ref subpath) = self.subpath {
            write!(f, "/{subpath}")?;
        }
        Ok(())
    }
}

/// Split `name[@version][/subpath]` (scope already stripped) into parts.
fn split_parts<'a>(
    input: &str,
    tail: &'a str,
) -> Result<(&'a str, VersionRequest, Option<String>), ResolveError> {
    if tail.is_empty() {
        return Err(ResolveError::parse(input, "empty package name"));
    }

    // An '@' only delimits the version when it comes before any '/';
    // later ones belong to the subpath.
    let at_pos = match (tail.find('@'), tail.find('/')) {
        (Some(at_pos), Some(slash_pos)) if at_pos > slash_pos => None,
        (at_pos, _) => at_pos,
    };

    let Some(at_pos) = at_pos else {
        if let Some(slash_pos) = tail.find('/') {
            let name = &tail[..slash_pos];
            let subpath = &tail[slash_pos + 1..];
            if name.is_empty() {
                return Err(ResolveError::parse(input, "empty package name"));
            }
            if subpath.is_empty() {
                return Err(ResolveError::parse(input, "empty subpath after '/'"));
            }
            return Ok((name, VersionRequest::Latest, Some(subpath.to_string())));
        }
        return Ok((tail, VersionRequest::Latest, None));
    };

    let name = &tail[..at_pos];
    let after = &tail[at_pos + 1..];
    if name.is_empty() {
        return Err(ResolveError::parse(input, "empty package name"));
    }
    if after.is_empty() {
        return Err(ResolveError::parse(input, "empty version after '@'"));
    }

    let (version_text, subpath) = match after.find('/') {
        Some(slash_pos) => {
            let subpath = &after[slash_pos + 1..];
            if subpath.is_empty() {
                return Err(ResolveError::parse(input, "empty subpath after '/'"));
            }
            (&after[..slash_pos], Some(subpath.to_string()))
        }
        None => (after, None),
    };

    if version_text.is_empty() {
        return Err(ResolveError::parse(input, "empty version after '@'"));
    }

    Ok((name, VersionRequest::parse(version_text), subpath))
}

fn validate_name_part(input: &str, part: &str) -> Result<(), ResolveError> {
    // Basic validation: no spaces, no special chars except - _ .
    for c in part.chars() {
        if !c.is_alphanumeric() && c != '-' && c != '_' && c != '.' {
            return Err(ResolveError::parse(
                input,
                format!("invalid character '{c}' in package name"),
            ));
        }
    }
    Ok(())
}

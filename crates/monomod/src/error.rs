//! Resolver error types.

use thiserror::Error;

/// Error type for resolver operations.
///
/// Every variant owns its context as plain strings so a single failure
/// can be cloned out to all callers waiting on the same in-flight load.
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// The specifier string could not be parsed.
    #[error("invalid specifier '{input}': {reason}")]
    Parse { input: String, reason: String },

    /// The transport failed while fetching metadata or module source.
    ///
    /// `key` is the canonical key once one exists; during version
    /// pinning it is the package name.
    #[error("fetch failed for '{specifier}' ({key}): {message}")]
    Fetch {
        specifier: String,
        key: String,
        message: String,
    },

    /// The evaluation sandbox rejected the fetched source.
    #[error("evaluation failed for '{specifier}' ({key}): {message}")]
    Evaluation {
        specifier: String,
        key: String,
        message: String,
    },

    /// Metadata was fetched but no published version satisfies the request.
    #[error("no version of {name} satisfies: {request}")]
    VersionNotFound { name: String, request: String },

    /// The name is already aliased to a different provider.
    ///
    /// The original mapping stays active.
    #[error("alias conflict for '{name}': '{existing}' is registered, rejecting '{rejected}'")]
    AliasConflict {
        name: String,
        existing: String,
        rejected: String,
    },

    /// Following the alias chain revisited a name.
    #[error("alias cycle detected at '{name}': {}", .path.join(" -> "))]
    AliasCycle { name: String, path: Vec<String> },
}

impl ResolveError {
    /// Create a parse error for the given input.
    pub fn parse(input: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

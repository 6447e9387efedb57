//! Alias registry: redirecting a dependent's request to a shared provider.

use crate::error::ResolveError;
use crate::spec::PackageSpecifier;
use std::collections::HashMap;

/// Maps a dependent package name to the provider specifier that should
/// satisfy it.
///
/// First registration wins: re-registering the identical provider is a
/// no-op, a different provider is a conflict and the original mapping
/// stays untouched.
#[derive(Debug, Default)]
pub struct AliasRegistry {
    entries: HashMap<String, PackageSpecifier>,
}

impl AliasRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dependent -> provider`.
    ///
    /// # Errors
    /// Returns `AliasConflict` if `dependent` is already mapped to a
    /// different provider.
    pub fn register(
        &mut self,
        dependent: &str,
        provider: PackageSpecifier,
    ) -> Result<(), ResolveError> {
        if let Some(existing) = self.entries.get(dependent) {
            if *existing == provider {
                return Ok(());
            }
            return Err(ResolveError::AliasConflict {
                name: dependent.to_string(),
                existing: existing.to_string(),
                rejected: provider.to_string(),
            });
        }

        self.entries.insert(dependent.to_string(), provider);
        Ok(())
    }

    /// Look up the provider for a dependent name.
    #[must_use]
    pub fn provider(&self, dependent: &str) -> Option<&PackageSpecifier> {
        self.entries.get(dependent)
    }

    /// Number of registered aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Loaded module model: canonical keys, instance identity, exports.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Cache identity of a module: `name@version` plus an optional `/subpath`.
///
/// Derived only after the version request has been pinned, so
/// `name@latest` requested directly and `name@<pinned>` requested
/// transitively normalize to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// Build a key from a package name, pinned version, and optional subpath.
    #[must_use]
    pub fn new(name: &str, version: &str, subpath: Option<&str>) -> Self {
        match subpath {
            Some(subpath) => Self(format!("{name}@{version}/{subpath}")),
            None => Self(format!("{name}@{version}")),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identity token for one evaluated module instance.
///
/// Two resolutions that observe the same id share one instance; distinct
/// ids mean the module state was duplicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(u64);

impl InstanceId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Named bindings produced by evaluating a module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleExports(BTreeMap<String, Value>);

impl ModuleExports {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a named export.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    /// Look up an export by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Exported names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, Value>> for ModuleExports {
    fn from(bindings: BTreeMap<String, Value>) -> Self {
        Self(bindings)
    }
}

impl FromIterator<(String, Value)> for ModuleExports {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A module the resolver has fetched, evaluated, and cached.
///
/// Handed out as `Arc<LoadedModule>`; the resolver keeps the owning copy
/// for its whole lifetime, so equal canonical keys always observe one
/// instance.
#[derive(Debug)]
pub struct LoadedModule {
    /// Cache identity this module is stored under.
    pub key: CanonicalKey,
    /// Evaluated exports.
    pub exports: ModuleExports,
    /// Identity token; equal ids mean the same evaluation.
    pub instance_id: InstanceId,
}

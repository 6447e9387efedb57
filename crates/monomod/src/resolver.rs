//! The resolver: parse, redirect, pin, and single-flight module loading.
//!
//! One `Mutex` guards the module cache, the in-flight load table, the
//! metadata memo, and the alias registry. Critical sections never hold
//! the lock across an await; loads run as detached tasks publishing
//! their outcome through a watch channel, so every concurrent caller
//! for a key observes the one load.

use crate::alias::AliasRegistry;
use crate::error::ResolveError;
use crate::module::{CanonicalKey, InstanceId, LoadedModule};
use crate::sandbox::Evaluator;
use crate::spec::{PackageSpecifier, VersionRequest};
use crate::transport::Transport;
use crate::version::{pin_version, PackageMetadata};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome slot published by an in-flight load.
type LoadSlot = Option<Result<Arc<LoadedModule>, ResolveError>>;

/// Dynamic module resolver with shared-instance aliasing.
///
/// Resolves `name@version/subpath` specifiers to loaded modules,
/// memoized by canonical key: equivalent requests, sequential or
/// concurrent, direct or alias-redirected, always observe one instance
/// per key. Cheap to clone; all clones share one cache, alias table,
/// and in-flight load table.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    transport: Arc<dyn Transport>,
    evaluator: Arc<dyn Evaluator>,
    state: Mutex<ResolverState>,
    next_instance: AtomicU64,
}

#[derive(Default)]
struct ResolverState {
    /// Canonical key -> loaded module. Entries never leave.
    modules: HashMap<CanonicalKey, Arc<LoadedModule>>,
    /// Package name -> memoized version metadata. First fetch wins.
    metadata: HashMap<String, Arc<PackageMetadata>>,
    /// Canonical key -> receiver for the load in flight.
    in_flight: HashMap<CanonicalKey, watch::Receiver<LoadSlot>>,
    /// Dependent name -> provider specifier.
    aliases: AliasRegistry,
}

/// Cache hit, or a slot to wait on.
enum LoadTicket {
    Ready(Arc<LoadedModule>),
    Wait(watch::Receiver<LoadSlot>),
}

// Manual Debug impl because the collaborator trait objects don't implement Debug
impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Resolver")
            .field("evaluator", &self.inner.evaluator.name())
            .field("loaded_modules", &stats.loaded_modules)
            .field("aliases", &stats.aliases)
            .finish()
    }
}

impl Resolver {
    /// Create a resolver over the given transport and evaluation sandbox.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                transport,
                evaluator,
                state: Mutex::new(ResolverState::default()),
                next_instance: AtomicU64::new(1),
            }),
        }
    }

    /// Resolve a specifier to a loaded module.
    ///
    /// Must run inside a Tokio runtime: loads are spawned as detached
    /// tasks, so dropping this future never aborts a load other callers
    /// are waiting on.
    ///
    /// # Errors
    /// See [`ResolveError`] for the taxonomy. Failures are never cached;
    /// a later call for the same key retries from the transport.
    pub async fn resolve(&self, specifier: &str) -> Result<Arc<LoadedModule>, ResolveError> {
        let requested = PackageSpecifier::parse(specifier)?;
        let effective = self.follow_aliases(requested)?;
        let version = self.pin(specifier, &effective).await?;
        let key = CanonicalKey::new(&effective.name, &version, effective.subpath.as_deref());

        match self.join_or_start(specifier, &effective, &version, &key) {
            LoadTicket::Ready(module) => Ok(module),
            LoadTicket::Wait(rx) => Self::await_outcome(specifier, &key, rx).await,
        }
    }

    /// Register a shared-instance alias: requests for `dependent` are
    /// redirected to `provider` before any version pinning or loading.
    ///
    /// Registering the same mapping again is a no-op; a different
    /// provider for an already-aliased name is rejected and the original
    /// mapping stays active.
    ///
    /// # Errors
    /// Returns `Parse` if `dependent` is not a bare package name or
    /// `provider` is not a valid specifier, and `AliasConflict` on
    /// re-registration with a different provider.
    pub fn register_alias(&self, dependent: &str, provider: &str) -> Result<(), ResolveError> {
        let dependent_spec = PackageSpecifier::parse(dependent)?;
        if !matches!(dependent_spec.version, VersionRequest::Latest)
            || dependent_spec.subpath.is_some()
        {
            return Err(ResolveError::parse(
                dependent,
                "alias dependent must be a bare package name",
            ));
        }
        let provider_spec = PackageSpecifier::parse(provider)?;

        let mut state = self.inner.state.lock().unwrap();
        state.aliases.register(&dependent_spec.name, provider_spec)?;
        debug!(dependent = %dependent_spec.name, provider, "alias registered");
        Ok(())
    }

    /// Look up an already-loaded module without triggering a load.
    #[must_use]
    pub fn cached(&self, key: &CanonicalKey) -> Option<Arc<LoadedModule>> {
        let state = self.inner.state.lock().unwrap();
        state.modules.get(key).map(Arc::clone)
    }

    /// Snapshot of resolver state sizes.
    #[must_use]
    pub fn stats(&self) -> ResolverStats {
        let state = self.inner.state.lock().unwrap();
        ResolverStats {
            loaded_modules: state.modules.len(),
            memoized_packages: state.metadata.len(),
            in_flight_loads: state.in_flight.len(),
            aliases: state.aliases.len(),
        }
    }

    /// Apply alias redirection until no mapping applies.
    ///
    /// Substitution is wholesale: the provider specifier replaces name,
    /// version, and subpath. A mapping only applies while the provider
    /// differs from the current specifier, so a self-pin terminates.
    /// Revisiting a name is a cycle.
    fn follow_aliases(
        &self,
        requested: PackageSpecifier,
    ) -> Result<PackageSpecifier, ResolveError> {
        let state = self.inner.state.lock().unwrap();
        let mut current = requested;
        let mut path: Vec<String> = vec![current.name.clone()];

        while let Some(provider) = state.aliases.provider(&current.name) {
            if *provider == current {
                // A self-pin has converged
                break;
            }
            if provider.name != current.name {
                if path.iter().any(|seen| *seen == provider.name) {
                    let name = provider.name.clone();
                    path.push(name.clone());
                    return Err(ResolveError::AliasCycle { name, path });
                }
                path.push(provider.name.clone());
            }
            debug!(from = %current, to = %provider, "alias redirect");
            current = provider.clone();
        }

        Ok(current)
    }

    /// Pin the version request to a concrete version.
    ///
    /// Exact requests pin to themselves with no I/O. Anything else goes
    /// through the per-name metadata memo, so racing callers pin
    /// identically once the first fetched copy lands.
    async fn pin(
        &self,
        specifier: &str,
        spec: &PackageSpecifier,
    ) -> Result<String, ResolveError> {
        if let VersionRequest::Exact(version) = &spec.version {
            return Ok(version.to_string());
        }

        let metadata = self.package_metadata(specifier, &spec.name).await?;
        pin_version(&metadata, &spec.version)
    }

    async fn package_metadata(
        &self,
        specifier: &str,
        name: &str,
    ) -> Result<Arc<PackageMetadata>, ResolveError> {
        {
            let state = self.inner.state.lock().unwrap();
            if let Some(metadata) = state.metadata.get(name) {
                debug!(name, "metadata memo hit");
                return Ok(Arc::clone(metadata));
            }
        }

        let fetched = self
            .inner
            .transport
            .fetch_metadata(name)
            .await
            .map_err(|e| ResolveError::Fetch {
                specifier: specifier.to_string(),
                key: name.to_string(),
                message: e.to_string(),
            })?;

        // Re-check under the lock; a racing fetch may have landed first
        let mut state = self.inner.state.lock().unwrap();
        let entry = state
            .metadata
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(fetched));
        Ok(Arc::clone(entry))
    }

    /// Hit the cache, join an in-flight load, or become the loader.
    ///
    /// The cache check and the in-flight registration happen under one
    /// lock acquisition, so a second load for the same key cannot start.
    fn join_or_start(
        &self,
        specifier: &str,
        spec: &PackageSpecifier,
        version: &str,
        key: &CanonicalKey,
    ) -> LoadTicket {
        let mut state = self.inner.state.lock().unwrap();

        if let Some(module) = state.modules.get(key) {
            debug!(key = %key, instance = %module.instance_id, "cache hit");
            return LoadTicket::Ready(Arc::clone(module));
        }

        if let Some(rx) = state.in_flight.get(key) {
            debug!(key = %key, "joining in-flight load");
            return LoadTicket::Wait(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(key.clone(), rx.clone());
        drop(state);

        debug!(key = %key, "starting load");
        let resolver = self.clone();
        let task_specifier = specifier.to_string();
        let task_spec = spec.clone();
        let task_version = version.to_string();
        let task_key = key.clone();
        tokio::spawn(async move {
            let outcome = resolver
                .load(&task_specifier, &task_spec, &task_version, &task_key)
                .await;
            let _ = tx.send(Some(outcome));
        });

        LoadTicket::Wait(rx)
    }

    /// Fetch, evaluate, and commit one module load.
    ///
    /// On success the module lands in the cache and the in-flight slot
    /// is removed in the same critical section, so later callers see
    /// exactly one of "in flight" or "loaded". On failure the slot is
    /// removed and nothing is cached.
    async fn load(
        &self,
        specifier: &str,
        spec: &PackageSpecifier,
        version: &str,
        key: &CanonicalKey,
    ) -> Result<Arc<LoadedModule>, ResolveError> {
        let outcome = self.fetch_and_evaluate(specifier, spec, version, key).await;

        let mut state = self.inner.state.lock().unwrap();
        state.in_flight.remove(key);
        match outcome {
            Ok(module) => {
                let module = Arc::new(module);
                state.modules.insert(key.clone(), Arc::clone(&module));
                debug!(key = %key, instance = %module.instance_id, "module loaded");
                Ok(module)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "load failed");
                Err(e)
            }
        }
    }

    async fn fetch_and_evaluate(
        &self,
        specifier: &str,
        spec: &PackageSpecifier,
        version: &str,
        key: &CanonicalKey,
    ) -> Result<LoadedModule, ResolveError> {
        let source = self
            .inner
            .transport
            .fetch_source(&spec.name, version, spec.subpath.as_deref())
            .await
            .map_err(|e| ResolveError::Fetch {
                specifier: specifier.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let exports = self
            .inner
            .evaluator
            .evaluate(key, &source)
            .map_err(|e| ResolveError::Evaluation {
                specifier: specifier.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let instance_id =
            InstanceId::new(self.inner.next_instance.fetch_add(1, Ordering::Relaxed));
        Ok(LoadedModule {
            key: key.clone(),
            exports,
            instance_id,
        })
    }

    /// Wait for an in-flight load to publish its outcome.
    async fn await_outcome(
        specifier: &str,
        key: &CanonicalKey,
        mut rx: watch::Receiver<LoadSlot>,
    ) -> Result<Arc<LoadedModule>, ResolveError> {
        loop {
            let slot = rx.borrow_and_update().clone();
            if let Some(outcome) = slot {
                return outcome;
            }
            if rx.changed().await.is_err() {
                // Publisher died without sending
                return Err(ResolveError::Fetch {
                    specifier: specifier.to_string(),
                    key: key.to_string(),
                    message: "load task dropped before completing".to_string(),
                });
            }
        }
    }
}

/// Resolver state counts.
#[derive(Debug, Clone, Copy)]
pub struct ResolverStats {
    pub loaded_modules: usize,
    pub memoized_packages: usize,
    pub in_flight_loads: usize,
    pub aliases: usize,
}

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! Dynamic module resolver with shared-instance aliasing.
//!
//! Resolves npm-style `name@version/subpath` specifiers to evaluated
//! modules, memoized by canonical key: equivalent requests, sequential
//! or concurrent, observe one module instance per key. Aliases redirect
//! a dependent package to a provider before version pinning, so a host
//! that ships its own copy of a library can point every request for the
//! original name at that copy.
//!
//! ```no_run
//! use monomod::{HttpTransport, JsonEvaluator, Resolver};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = Resolver::new(
//!     Arc::new(HttpTransport::from_env()?),
//!     Arc::new(JsonEvaluator::new()),
//! );
//!
//! resolver.register_alias("react", "ink@4.4.1")?;
//! let ink = resolver.resolve("ink@4.4.1").await?;
//! let react = resolver.resolve("react").await?;
//! assert_eq!(ink.instance_id, react.instance_id);
//! # Ok(())
//! # }
//! ```

pub mod alias;
pub mod error;
pub mod module;
pub mod resolver;
pub mod sandbox;
pub mod spec;
pub mod transport;
pub mod version;

pub use alias::AliasRegistry;
pub use error::ResolveError;
pub use module::{CanonicalKey, InstanceId, LoadedModule, ModuleExports};
pub use resolver::{Resolver, ResolverStats};
pub use sandbox::{EvalError, Evaluator, JsonEvaluator};
pub use spec::{PackageSpecifier, VersionRequest};
pub use transport::{HttpTransport, MemoryTransport, Transport, TransportError};
pub use version::{pin_version, PackageMetadata};

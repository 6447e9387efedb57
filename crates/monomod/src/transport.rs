//! Transport seam: fetching package metadata and module source.
//!
//! The resolver never talks to the network itself; it goes through a
//! [`Transport`]. [`HttpTransport`] speaks to an npm-style registry for
//! metadata and a CDN for source. [`MemoryTransport`] serves a
//! pre-published package table and counts fetches, for tests and
//! network-free embedding.

use crate::version::PackageMetadata;
use futures::future::BoxFuture;
use reqwest::Client;
use semver::Version;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default registry endpoint for version metadata.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";

/// Default CDN endpoint for module source.
pub const DEFAULT_CDN: &str = "https://unpkg.com/";

/// Environment variable overriding the registry endpoint.
pub const REGISTRY_ENV: &str = "MONOMOD_REGISTRY";

/// Environment variable overriding the CDN endpoint.
pub const CDN_ENV: &str = "MONOMOD_CDN";

/// Maximum module source size (8 MB).
pub const MAX_SOURCE_SIZE: u64 = 8 * 1024 * 1024;

/// Transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint reported the package or file as missing.
    #[error("not found: {target}")]
    NotFound { target: String },

    /// The endpoint answered with a non-success status.
    #[error("status {status} for '{target}'")]
    Status { target: String, status: u16 },

    /// Connection, timeout, or protocol failure.
    #[error("network error for '{target}': {message}")]
    Network { target: String, message: String },

    /// Endpoint configuration could not be parsed.
    #[error("invalid endpoint URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The response body exceeded the size cap.
    #[error("response too large for '{target}': {len} bytes (max: {max})")]
    TooLarge { target: String, len: u64, max: u64 },

    /// The response decoded but did not look like package metadata.
    #[error("malformed metadata for '{target}': {message}")]
    Malformed { target: String, message: String },
}

impl TransportError {
    fn from_reqwest(target: &str, e: &reqwest::Error) -> Self {
        let message = if e.is_timeout() {
            format!("request timed out: {e}")
        } else if e.is_connect() {
            format!("connection failed: {e}")
        } else {
            e.to_string()
        };
        Self::Network {
            target: target.to_string(),
            message,
        }
    }
}

/// Fetches package metadata and module source for the resolver.
///
/// Implementations must be shareable across tasks; the resolver calls
/// them from spawned load tasks.
pub trait Transport: Send + Sync {
    /// Fetch version metadata for a package name.
    ///
    /// # Errors
    /// Returns an error if the package is unknown or the fetch fails.
    fn fetch_metadata<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<PackageMetadata, TransportError>>;

    /// Fetch raw module source for a pinned version, optionally at a
    /// subpath inside the package.
    ///
    /// # Errors
    /// Returns an error if the module is missing or the fetch fails.
    fn fetch_source<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
        subpath: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, TransportError>>;
}

/// HTTP transport: registry for metadata, CDN for module source.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    registry: Url,
    cdn: Url,
    http: Client,
    max_source_size: u64,
}

impl HttpTransport {
    /// Create a transport against the given registry and CDN endpoints.
    ///
    /// # Errors
    /// Returns an error if an endpoint URL is invalid or the HTTP client
    /// cannot be created.
    pub fn new(registry: &str, cdn: &str) -> Result<Self, TransportError> {
        let registry = parse_endpoint(registry)?;
        let cdn = parse_endpoint(cdn)?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("monomod/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Network {
                target: "client".to_string(),
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            registry,
            cdn,
            http,
            max_source_size: MAX_SOURCE_SIZE,
        })
    }

    /// Create a transport from `MONOMOD_REGISTRY` / `MONOMOD_CDN`,
    /// falling back to the public npm registry and unpkg.
    ///
    /// # Errors
    /// Returns an error if a configured endpoint URL is invalid.
    pub fn from_env() -> Result<Self, TransportError> {
        let registry =
            std::env::var(REGISTRY_ENV).unwrap_or_else(|_| DEFAULT_REGISTRY.to_string());
        let cdn = std::env::var(CDN_ENV).unwrap_or_else(|_| DEFAULT_CDN.to_string());
        Self::new(&registry, &cdn)
    }

    /// Registry endpoint in use.
    #[must_use]
    pub fn registry(&self) -> &Url {
        &self.registry
    }

    /// CDN endpoint in use.
    #[must_use]
    pub fn cdn(&self) -> &Url {
        &self.cdn
    }

    async fn get_metadata(&self, name: &str) -> Result<PackageMetadata, TransportError> {
        let encoded = encode_name(name);
        let url = self
            .registry
            .join(&encoded)
            .map_err(|e| TransportError::InvalidUrl {
                url: format!("{}{encoded}", self.registry),
                message: e.to_string(),
            })?;

        let response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(name, &e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound {
                target: name.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(TransportError::Status {
                target: name.to_string(),
                status: response.status().as_u16(),
            });
        }

        let packument: serde_json::Value =
            response.json().await.map_err(|e| TransportError::Malformed {
                target: name.to_string(),
                message: format!("invalid JSON: {e}"),
            })?;

        if !packument.is_object() {
            return Err(TransportError::Malformed {
                target: name.to_string(),
                message: "packument is not an object".to_string(),
            });
        }

        Ok(PackageMetadata::from_packument(name, &packument))
    }

    async fn get_source(
        &self,
        name: &str,
        version: &str,
        subpath: Option<&str>,
    ) -> Result<String, TransportError> {
        let path = source_path(name, version, subpath);
        let url = self.cdn.join(&path).map_err(|e| TransportError::InvalidUrl {
            url: format!("{}{path}", self.cdn),
            message: e.to_string(),
        })?;

        let response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&path, &e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound { target: path });
        }
        if !response.status().is_success() {
            return Err(TransportError::Status {
                target: path,
                status: response.status().as_u16(),
            });
        }

        // Check content length before reading the body
        if let Some(len) = response.content_length() {
            if len > self.max_source_size {
                return Err(TransportError::TooLarge {
                    target: path,
                    len,
                    max: self.max_source_size,
                });
            }
        }

        let body = response.text().await.map_err(|e| TransportError::Network {
            target: path.clone(),
            message: format!("failed to read body: {e}"),
        })?;

        if body.len() as u64 > self.max_source_size {
            return Err(TransportError::TooLarge {
                target: path,
                len: body.len() as u64,
                max: self.max_source_size,
            });
        }

        Ok(body)
    }
}

impl Transport for HttpTransport {
    fn fetch_metadata<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<PackageMetadata, TransportError>> {
        Box::pin(self.get_metadata(name))
    }

    fn fetch_source<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
        subpath: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(self.get_source(name, version, subpath))
    }
}

/// URL path for a module source fetch, e.g. `ink@4.4.1/build/index.js`.
fn source_path(name: &str, version: &str, subpath: Option<&str>) -> String {
    match subpath {
        Some(subpath) => format!("{name}@{version}/{subpath}"),
        None => format!("{name}@{version}"),
    }
}

/// URL-encode a package name for registry requests.
///
/// Scoped names carry a literal `/` that must not start a new path segment.
fn encode_name(name: &str) -> String {
    if name.starts_with('@') {
        name.replace('/', "%2F")
    } else {
        name.to_string()
    }
}

fn parse_endpoint(input: &str) -> Result<Url, TransportError> {
    Url::parse(input).map_err(|e| TransportError::InvalidUrl {
        url: input.to_string(),
        message: e.to_string(),
    })
}

/// In-memory transport for tests and network-free embedding.
///
/// Packages are published up front; fetches are counted so callers can
/// assert how often the resolver actually hit the transport.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    packages: RwLock<HashMap<String, MemoryPackage>>,
    metadata_fetches: AtomicUsize,
    source_fetches: AtomicUsize,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemoryPackage {
    dist_tags: BTreeMap<String, String>,
    /// version -> (subpath, or "" for the package root) -> source
    sources: HashMap<String, HashMap<String, String>>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add artificial latency to every fetch, for concurrency tests.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Publish module source under `name@version`, optionally at a subpath.
    ///
    /// The `latest` dist-tag tracks the highest published version; use
    /// [`MemoryTransport::tag`] afterwards to point it elsewhere.
    pub fn publish(&self, name: &str, version: &str, subpath: Option<&str>, source: &str) {
        let mut packages = self.packages.write().unwrap();
        let pkg = packages.entry(name.to_string()).or_default();
        pkg.sources
            .entry(version.to_string())
            .or_default()
            .insert(subpath.unwrap_or("").to_string(), source.to_string());

        let highest = pkg
            .sources
            .keys()
            .filter_map(|v| Version::parse(v).ok())
            .max();
        if let Some(highest) = highest {
            pkg.dist_tags
                .insert("latest".to_string(), highest.to_string());
        }
    }

    /// Point a dist-tag at a version.
    pub fn tag(&self, name: &str, tag: &str, version: &str) {
        let mut packages = self.packages.write().unwrap();
        let pkg = packages.entry(name.to_string()).or_default();
        pkg.dist_tags.insert(tag.to_string(), version.to_string());
    }

    /// Number of metadata fetches served so far.
    #[must_use]
    pub fn metadata_fetches(&self) -> usize {
        self.metadata_fetches.load(Ordering::SeqCst)
    }

    /// Number of source fetches served so far.
    #[must_use]
    pub fn source_fetches(&self) -> usize {
        self.source_fetches.load(Ordering::SeqCst)
    }

    /// Total fetches of both kinds.
    #[must_use]
    pub fn total_fetches(&self) -> usize {
        self.metadata_fetches() + self.source_fetches()
    }
}

impl Transport for MemoryTransport {
    fn fetch_metadata<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<PackageMetadata, TransportError>> {
        Box::pin(async move {
            self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            let packages = self.packages.read().unwrap();
            let pkg = packages.get(name).ok_or_else(|| TransportError::NotFound {
                target: name.to_string(),
            })?;

            Ok(PackageMetadata {
                name: name.to_string(),
                dist_tags: pkg.dist_tags.clone(),
                versions: pkg.sources.keys().cloned().collect(),
            })
        })
    }

    fn fetch_source<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
        subpath: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            self.source_fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            let target = source_path(name, version, subpath);
            let packages = self.packages.read().unwrap();
            packages
                .get(name)
                .and_then(|pkg| pkg.sources.get(version))
                .and_then(|files| files.get(subpath.unwrap_or("")))
                .cloned()
                .ok_or_else(|| TransportError::NotFound { target })
        })
    }
}

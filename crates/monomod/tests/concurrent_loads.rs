//! Single-flight behavior under concurrency: one load per key, shared
//! outcomes, and loads that outlive their callers.

use futures::future::{join_all, BoxFuture};
use monomod::{
    CanonicalKey, EvalError, Evaluator, JsonEvaluator, MemoryTransport, ModuleExports,
    PackageMetadata, ResolveError, Resolver, Transport, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Evaluator wrapper that counts evaluations.
struct CountingEvaluator {
    inner: JsonEvaluator,
    evals: AtomicUsize,
}

impl CountingEvaluator {
    fn new() -> Self {
        Self {
            inner: JsonEvaluator::new(),
            evals: AtomicUsize::new(0),
        }
    }

    fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }
}

impl Evaluator for CountingEvaluator {
    fn name(&self) -> &str {
        "counting-json"
    }

    fn evaluate(&self, key: &CanonicalKey, source: &str) -> Result<ModuleExports, EvalError> {
        self.evals.fetch_add(1, Ordering::SeqCst);
        self.inner.evaluate(key, source)
    }
}

/// Transport wrapper that injects source fetch failures.
struct FlakyTransport {
    inner: MemoryTransport,
    failures_remaining: AtomicUsize,
    attempts: AtomicUsize,
    failure_delay: Option<Duration>,
}

impl FlakyTransport {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryTransport::new(),
            failures_remaining: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            failure_delay: None,
        }
    }

    fn with_failure_delay(mut self, delay: Duration) -> Self {
        self.failure_delay = Some(delay);
        self
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Transport for FlakyTransport {
    fn fetch_metadata<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<PackageMetadata, TransportError>> {
        self.inner.fetch_metadata(name)
    }

    fn fetch_source<'a>(
        &'a self,
        name: &'a str,
        version: &'a str,
        subpath: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, TransportError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                if let Some(delay) = self.failure_delay {
                    sleep(delay).await;
                }
                return Err(TransportError::Network {
                    target: format!("{name}@{version}"),
                    message: "injected failure".to_string(),
                });
            }
            self.inner.fetch_source(name, version, subpath).await
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_share_one_load() {
    let transport = Arc::new(MemoryTransport::new().with_latency(Duration::from_millis(25)));
    transport.publish("pkg", "1.0.0", None, r#"{"default": "pkg"}"#);
    let evaluator = Arc::new(CountingEvaluator::new());
    let resolver = Resolver::new(transport.clone(), evaluator.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = resolver.clone();
        handles.push(tokio::spawn(
            async move { resolver.resolve("pkg@1.0.0").await },
        ));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let module = handle.await.unwrap().unwrap();
        ids.push(module.instance_id);
    }

    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(transport.source_fetches(), 1);
    assert_eq!(evaluator.evals(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failure_broadcasts_to_all_waiters() {
    let transport =
        Arc::new(FlakyTransport::new(usize::MAX).with_failure_delay(Duration::from_millis(200)));
    transport.inner.publish("pkg", "1.0.0", None, r#"{"default": "pkg"}"#);
    let resolver = Resolver::new(transport.clone(), Arc::new(JsonEvaluator::new()));

    let outcomes = join_all((0..4).map(|_| resolver.resolve("pkg@1.0.0"))).await;

    assert_eq!(outcomes.len(), 4);
    for outcome in &outcomes {
        match outcome {
            Err(ResolveError::Fetch { message, .. }) => {
                assert!(message.contains("injected failure"));
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }
    // One attempt served every waiter, and no failure was cached
    assert_eq!(transport.attempts(), 1);
    assert_eq!(resolver.stats().loaded_modules, 0);
    assert_eq!(resolver.stats().in_flight_loads, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_load_retries_on_next_call() {
    let transport = Arc::new(FlakyTransport::new(1));
    transport.inner.publish("pkg", "1.0.0", None, r#"{"default": "pkg"}"#);
    let resolver = Resolver::new(transport.clone(), Arc::new(JsonEvaluator::new()));

    let err = resolver.resolve("pkg@1.0.0").await.unwrap_err();
    assert!(matches!(err, ResolveError::Fetch { .. }));
    assert_eq!(resolver.stats().loaded_modules, 0);

    let module = resolver.resolve("pkg@1.0.0").await.unwrap();
    assert_eq!(module.key.as_str(), "pkg@1.0.0");
    assert_eq!(transport.attempts(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_latest_and_exact_share_one_load() {
    let transport = Arc::new(MemoryTransport::new().with_latency(Duration::from_millis(25)));
    transport.publish("pkg", "1.0.0", None, r#"{"default": "pkg"}"#);
    let resolver = Resolver::new(transport.clone(), Arc::new(JsonEvaluator::new()));

    let (latest, exact) = tokio::join!(resolver.resolve("pkg"), resolver.resolve("pkg@1.0.0"));
    let latest = latest.unwrap();
    let exact = exact.unwrap();

    assert_eq!(latest.instance_id, exact.instance_id);
    assert_eq!(transport.source_fetches(), 1);
    assert_eq!(transport.metadata_fetches(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_caller_cancellation_does_not_abort_load() {
    let transport = Arc::new(MemoryTransport::new().with_latency(Duration::from_millis(50)));
    transport.publish("pkg", "1.0.0", None, r#"{"default": "pkg"}"#);
    let resolver = Resolver::new(transport.clone(), Arc::new(JsonEvaluator::new()));

    let task = {
        let resolver = resolver.clone();
        tokio::spawn(async move { resolver.resolve("pkg@1.0.0").await })
    };
    sleep(Duration::from_millis(10)).await;
    assert_eq!(resolver.stats().in_flight_loads, 1);
    task.abort();
    let _ = task.await;

    // The detached load keeps running and commits on its own
    sleep(Duration::from_millis(200)).await;
    assert_eq!(resolver.stats().loaded_modules, 1);

    let module = resolver.resolve("pkg@1.0.0").await.unwrap();
    assert_eq!(module.key.as_str(), "pkg@1.0.0");
    assert_eq!(transport.source_fetches(), 1);
}

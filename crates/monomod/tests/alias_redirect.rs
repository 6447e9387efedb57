//! Alias registration and redirection: dependents observe the
//! provider's already-loaded instance with no additional fetches.

use monomod::{CanonicalKey, JsonEvaluator, MemoryTransport, ResolveError, Resolver};
use std::sync::Arc;

fn make_resolver() -> (Resolver, Arc<MemoryTransport>) {
    let transport = Arc::new(MemoryTransport::new());
    let resolver = Resolver::new(transport.clone(), Arc::new(JsonEvaluator::new()));
    (resolver, transport)
}

#[tokio::test]
async fn test_alias_redirects_to_loaded_provider() {
    let (resolver, transport) = make_resolver();
    transport.publish(
        "ink",
        "4.4.1",
        None,
        r#"{"render": "ink-render", "Text": "ink-text"}"#,
    );

    let ink = resolver.resolve("ink@4.4.1").await.unwrap();
    assert_eq!(transport.source_fetches(), 1);
    assert_eq!(transport.metadata_fetches(), 0);

    resolver.register_alias("react", "ink@4.4.1").unwrap();

    let react_latest = resolver.resolve("react@latest").await.unwrap();
    let react_bare = resolver.resolve("react").await.unwrap();

    assert_eq!(react_latest.instance_id, ink.instance_id);
    assert_eq!(react_bare.instance_id, ink.instance_id);
    assert_eq!(react_bare.key.as_str(), "ink@4.4.1");
    // Redirected requests ride the cache; the network was never touched again
    assert_eq!(transport.source_fetches(), 1);
    assert_eq!(transport.metadata_fetches(), 0);
}

#[tokio::test]
async fn test_alias_overrides_version_and_subpath() {
    let (resolver, transport) = make_resolver();
    transport.publish("ink", "4.4.1", None, r#"{"render": "ink-render"}"#);
    resolver.register_alias("react", "ink@4.4.1").unwrap();

    // The dependent's own version and subpath are discarded wholesale
    let module = resolver.resolve("react@18.0.0/jsx-runtime").await.unwrap();

    assert_eq!(module.key.as_str(), "ink@4.4.1");
    assert_eq!(transport.metadata_fetches(), 0);
}

#[tokio::test]
async fn test_reregistration_same_provider_is_noop() {
    let (resolver, _transport) = make_resolver();

    resolver.register_alias("react", "ink@4.4.1").unwrap();
    resolver.register_alias("react", "ink@4.4.1").unwrap();
    assert_eq!(resolver.stats().aliases, 1);
}

#[tokio::test]
async fn test_conflicting_registration_keeps_original() {
    let (resolver, transport) = make_resolver();
    transport.publish("ink", "4.4.1", None, r#"{"render": "ink-render"}"#);

    resolver.register_alias("react", "ink@4.4.1").unwrap();
    let err = resolver
        .register_alias("react", "preact@10.0.0")
        .unwrap_err();

    match err {
        ResolveError::AliasConflict {
            name,
            existing,
            rejected,
        } => {
            assert_eq!(name, "react");
            assert_eq!(existing, "ink@4.4.1");
            assert_eq!(rejected, "preact@10.0.0");
        }
        other => panic!("expected AliasConflict, got {other:?}"),
    }

    // The original mapping stays in effect
    let module = resolver.resolve("react").await.unwrap();
    assert_eq!(module.key.as_str(), "ink@4.4.1");
}

#[tokio::test]
async fn test_alias_chain_follows_to_terminal() {
    let (resolver, transport) = make_resolver();
    transport.publish("c", "1.0.0", None, r#"{"default": "c"}"#);

    resolver.register_alias("a", "b").unwrap();
    resolver.register_alias("b", "c@1.0.0").unwrap();

    let via_a = resolver.resolve("a").await.unwrap();
    let via_b = resolver.resolve("b").await.unwrap();

    assert_eq!(via_a.key.as_str(), "c@1.0.0");
    assert_eq!(via_a.instance_id, via_b.instance_id);
    assert_eq!(transport.source_fetches(), 1);
    assert_eq!(transport.metadata_fetches(), 0);
}

#[tokio::test]
async fn test_alias_cycle_detected() {
    let (resolver, transport) = make_resolver();
    resolver.register_alias("a", "b").unwrap();
    resolver.register_alias("b", "c").unwrap();
    resolver.register_alias("c", "a").unwrap();

    match resolver.resolve("a").await.unwrap_err() {
        ResolveError::AliasCycle { name, path } => {
            assert_eq!(name, "a");
            assert_eq!(path, vec!["a", "b", "c", "a"]);
        }
        other => panic!("expected AliasCycle, got {other:?}"),
    }

    // Entering the cycle from another member reports that member's walk
    match resolver.resolve("b").await.unwrap_err() {
        ResolveError::AliasCycle { name, path } => {
            assert_eq!(name, "b");
            assert_eq!(path, vec!["b", "c", "a", "b"]);
        }
        other => panic!("expected AliasCycle, got {other:?}"),
    }

    assert_eq!(transport.total_fetches(), 0);
}

#[tokio::test]
async fn test_alias_to_provider_subpath() {
    let (resolver, transport) = make_resolver();
    transport.publish("ink", "4.4.1", None, r#"{"render": "root"}"#);
    transport.publish("ink", "4.4.1", Some("compat"), r#"{"render": "compat"}"#);

    resolver.register_alias("react", "ink@4.4.1/compat").unwrap();

    let root = resolver.resolve("ink@4.4.1").await.unwrap();
    let redirected = resolver.resolve("react").await.unwrap();

    assert_eq!(redirected.key.as_str(), "ink@4.4.1/compat");
    assert_ne!(redirected.instance_id, root.instance_id);
}

#[tokio::test]
async fn test_alias_redirect_wins_over_prior_load() {
    let (resolver, transport) = make_resolver();
    transport.publish("react", "18.2.0", None, r#"{"createElement": "react"}"#);
    transport.publish("ink", "4.4.1", None, r#"{"render": "ink-render"}"#);

    let react = resolver.resolve("react@18.2.0").await.unwrap();
    assert_eq!(transport.source_fetches(), 1);

    resolver.register_alias("react", "ink@4.4.1").unwrap();

    // Redirection applies per resolve, even when the dependent is cached
    let redirected = resolver.resolve("react@18.2.0").await.unwrap();
    assert_eq!(redirected.key.as_str(), "ink@4.4.1");
    assert_ne!(redirected.instance_id, react.instance_id);

    // The earlier load keeps its slot under its own key
    let still_cached = resolver
        .cached(&CanonicalKey::new("react", "18.2.0", None))
        .unwrap();
    assert_eq!(still_cached.instance_id, react.instance_id);
}

//! Integration tests for the module loader.
//!
//! Tests cover:
//! - Concurrent loads of one key share a single fetch
//! - Cached loads perform no I/O
//! - Failed loads leave the key in neither the cache nor the in-flight map
//! - Equivalent relative keys share one cache entry
//! - The filesystem fetcher (tempfile-backed)
//! - LazyLoader state transitions and reset

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use declaro_loader::{
    FetchResponse, Fetcher, FsFetcher, LazyLoader, LoadError, LoadState, LoaderConfig,
    ModuleCache, ModuleLoader, TransportError,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Serves canned bodies after a short delay and counts fetches per URL.
#[derive(Default)]
struct StubFetcher {
    bodies: Mutex<HashMap<String, FetchResponse>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl StubFetcher {
    fn with(entries: &[(&str, FetchResponse)]) -> Arc<Self> {
        let stub = StubFetcher::default();
        {
            let mut bodies = stub.bodies.lock().unwrap();
            for (url, response) in entries {
                bodies.insert(url.to_string(), response.clone());
            }
        }
        Arc::new(stub)
    }

    fn set(&self, url: &str, response: FetchResponse) {
        self.bodies.lock().unwrap().insert(url.to_string(), response);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(url.to_string());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let response = self.bodies.lock().unwrap().get(url).cloned();
        response.ok_or_else(|| TransportError(format!("connection refused: {}", url)))
    }
}

fn module(components: serde_json::Value) -> FetchResponse {
    FetchResponse::ok(json!({ "declaro": "module/1", "components": components }).to_string())
}

fn loader(stub: &Arc<StubFetcher>, base: &str) -> ModuleLoader {
    let fetcher: Arc<dyn Fetcher> = stub.clone();
    ModuleLoader::new(fetcher, LoaderConfig::new(base))
}

// ---------------------------------------------------------------------------
// ModuleLoader
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_loads_share_one_fetch() {
    let stub = StubFetcher::with(&[("https://cdn.dev/a.json", module(json!({"A": 1})))]);
    let loader = loader(&stub, "https://cdn.dev");

    let (first, second) = tokio::join!(loader.load("a.json"), loader.load("./a.json"));
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(stub.calls(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.key, "https://cdn.dev/a.json");
    assert!(!loader.is_in_flight("a.json"));
    assert!(loader.cache().contains("https://cdn.dev/a.json"));
}

#[tokio::test]
async fn cached_load_does_no_io() {
    let stub = StubFetcher::with(&[("/m/a.json", module(json!({})))]);
    let loader = loader(&stub, "/m");

    loader.load("a.json").await.unwrap();
    loader.load("a.json").await.unwrap();
    loader.load("/m/x/../a.json").await.unwrap_err();
    assert_eq!(stub.calls(), 2, "absolute keys are not normalized");

    loader.load("sub/../a.json").await.unwrap();
    assert_eq!(stub.calls(), 2);
}

#[tokio::test]
async fn invalid_document_is_neither_cached_nor_in_flight() {
    let stub = StubFetcher::with(&[("/m/bad.json", FetchResponse::ok(r#"{"components": {}}"#))]);
    let loader = loader(&stub, "/m");

    let err = loader.load("bad.json").await.unwrap_err();
    assert!(matches!(err, LoadError::InvalidDocument { .. }));
    assert!(!loader.is_in_flight("bad.json"));
    assert!(!loader.cache().contains("/m/bad.json"));

    // Fixing the source makes a retry succeed.
    stub.set("/m/bad.json", module(json!({"Fixed": true})));
    let document = loader.load("bad.json").await.unwrap();
    assert_eq!(stub.calls(), 2);
    assert_eq!(document.component("Fixed"), Some(&json!(true)));
}

#[tokio::test]
async fn failures_are_distinguished() {
    let stub = StubFetcher::with(&[
        ("/m/missing.json", FetchResponse::status(404, "not found")),
        ("/m/garbled.json", FetchResponse::ok("{ nope")),
    ]);
    let loader = loader(&stub, "/m");

    match loader.load("missing.json").await.unwrap_err() {
        LoadError::LoadFailed { status, .. } => assert_eq!(status, Some(404)),
        other => panic!("expected LoadFailed, got {:?}", other),
    }
    let refused = loader.load("offline.json").await.unwrap_err();
    assert!(refused.is_retryable());
    assert_eq!(refused.key(), "/m/offline.json");

    let garbled = loader.load("garbled.json").await.unwrap_err();
    assert!(matches!(garbled, LoadError::ParseError { .. }));
    assert!(!garbled.is_retryable());
    assert!(loader.cache().is_empty());
}

#[tokio::test]
async fn load_component_reports_missing_names() {
    let stub = StubFetcher::with(&[("/m/ui.json", module(json!({"Button": {"tag": "button"}})))]);
    let loader = loader(&stub, "/m");

    assert_eq!(
        loader.load_component("ui.json", "Button").await.unwrap(),
        json!({"tag": "button"})
    );
    assert_eq!(
        loader.load_component("ui.json", "Slider").await.unwrap_err(),
        LoadError::ComponentNotFound {
            key: "/m/ui.json".into(),
            name: "Slider".into()
        }
    );
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn loaders_can_share_a_cache() {
    let stub = StubFetcher::with(&[("/m/a.json", module(json!({})))]);
    let cache = Arc::new(ModuleCache::new());
    let fetcher: Arc<dyn Fetcher> = stub.clone();
    let first = ModuleLoader::with_cache(Arc::clone(&fetcher), LoaderConfig::new("/m"), Arc::clone(&cache));
    let second = ModuleLoader::with_cache(fetcher, LoaderConfig::new("/m"), Arc::clone(&cache));

    first.load("a.json").await.unwrap();
    second.load("a.json").await.unwrap();
    assert_eq!(stub.calls(), 1);

    assert!(cache.invalidate("/m/a.json"));
    second.load("a.json").await.unwrap();
    assert_eq!(stub.calls(), 2);
}

#[tokio::test]
async fn dropped_callers_do_not_cancel_the_fetch() {
    let stub = StubFetcher::with(&[("/m/a.json", module(json!({})))]);
    let loader = loader(&stub, "/m");

    let abandoned = tokio::time::timeout(Duration::from_millis(1), loader.load("a.json")).await;
    assert!(abandoned.is_err());
    assert!(loader.is_in_flight("a.json"));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!loader.is_in_flight("a.json"));
    assert!(loader.cache().contains("/m/a.json"));
    loader.load("a.json").await.unwrap();
    assert_eq!(stub.calls(), 1);
}

// ---------------------------------------------------------------------------
// FsFetcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filesystem_modules_load_by_path_and_file_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("widgets.json");
    std::fs::write(
        &path,
        json!({ "declaro": "module/1", "components": { "Card": {} } }).to_string(),
    )
    .unwrap();

    let base = dir.path().to_string_lossy().to_string();
    let loader = ModuleLoader::new(Arc::new(FsFetcher::new()), LoaderConfig::new(base.clone()));

    let document = loader.load("widgets.json").await.unwrap();
    assert_eq!(document.component("Card"), Some(&json!({})));

    let by_url = format!("file://{}", path.display());
    let again = loader.load(&by_url).await.unwrap();
    assert_eq!(again.hash, document.hash);

    match loader.load("absent.json").await.unwrap_err() {
        LoadError::LoadFailed { status, .. } => assert_eq!(status, Some(404)),
        other => panic!("expected LoadFailed, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// LazyLoader
// ---------------------------------------------------------------------------

fn recorder(lazy: &LazyLoader) -> Arc<Mutex<Vec<&'static str>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let l = Arc::clone(&log);
    lazy.subscribe(move |state| l.lock().unwrap().push(state.name()));
    log
}

#[tokio::test]
async fn lazy_loader_walks_idle_loading_loaded() {
    let stub = StubFetcher::with(&[("/m/a.json", module(json!({})))]);
    let lazy = LazyLoader::new(Arc::new(loader(&stub, "/m")), "a.json");
    let log = recorder(&lazy);
    assert_eq!(lazy.state(), LoadState::Idle);

    let document = lazy.load().await.unwrap();
    assert_eq!(lazy.state(), LoadState::Loaded(document));
    assert_eq!(*log.lock().unwrap(), vec!["loading", "loaded"]);

    lazy.load().await.unwrap();
    assert_eq!(stub.calls(), 1);

    lazy.reset();
    assert_eq!(lazy.state(), LoadState::Idle);
    assert_eq!(*log.lock().unwrap(), vec!["loading", "loaded", "idle"]);
}

#[tokio::test]
async fn lazy_loader_error_and_reset() {
    let stub = StubFetcher::with(&[]);
    let lazy = LazyLoader::new(Arc::new(loader(&stub, "/m")), "gone.json");
    let log = recorder(&lazy);

    assert!(lazy.load().await.is_err());
    assert_eq!(lazy.state().name(), "error");

    // Error is settled until reset.
    assert!(lazy.load().await.is_err());
    assert_eq!(stub.calls(), 1);

    lazy.reset();
    lazy.reset();
    assert_eq!(*log.lock().unwrap(), vec!["loading", "error", "idle"]);

    stub.set("/m/gone.json", module(json!({})));
    lazy.load().await.unwrap();
    assert_eq!(lazy.state().name(), "loaded");
}

#[tokio::test]
async fn reset_during_load_discards_the_outcome() {
    let stub = StubFetcher::with(&[("/m/a.json", module(json!({})))]);
    let lazy = Arc::new(LazyLoader::new(Arc::new(loader(&stub, "/m")), "a.json"));

    let background = {
        let lazy = Arc::clone(&lazy);
        tokio::spawn(async move { lazy.load().await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(lazy.state(), LoadState::Loading);

    lazy.reset();
    background.await.unwrap().unwrap();
    assert_eq!(lazy.state(), LoadState::Idle);
}

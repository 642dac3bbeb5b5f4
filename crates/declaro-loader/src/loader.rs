//! The deduplicating module loader.
//!
//! # Deduplication
//!
//! Every load resolves its key to a canonical key first. A canonical key
//! lives in at most one of two maps:
//!
//! - the [`ModuleCache`], once a load has succeeded;
//! - the in-flight map, while a fetch is outstanding.
//!
//! A load that finds the key in flight awaits the same shared future
//! instead of fetching again. The fetch itself runs as a spawned task, so it
//! completes (and its bookkeeping runs) even if every caller stops waiting.
//! The task moves the result into the cache on success, or simply drops the
//! in-flight entry on failure so the next load retries.
//!
//! Lookups and the completion bookkeeping both run under the in-flight
//! entry lock, cache access second, so no caller can observe the key in
//! both maps or in neither while a fetch is finishing.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;

use declaro_core::ModuleDocument;

use crate::cache::ModuleCache;
use crate::config::LoaderConfig;
use crate::document::parse_document;
use crate::error::LoadError;
use crate::fetch::Fetcher;
use crate::key::canonicalize;

type LoadResult = Result<Arc<ModuleDocument>, LoadError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

pub struct ModuleLoader {
    fetcher: Arc<dyn Fetcher>,
    config: LoaderConfig,
    cache: Arc<ModuleCache>,
    in_flight: Arc<DashMap<String, SharedLoad>>,
}

impl ModuleLoader {
    /// Creates a loader with its own, empty cache.
    pub fn new(fetcher: Arc<dyn Fetcher>, config: LoaderConfig) -> Self {
        Self::with_cache(fetcher, config, Arc::new(ModuleCache::new()))
    }

    /// Creates a loader over an existing cache.
    pub fn with_cache(fetcher: Arc<dyn Fetcher>, config: LoaderConfig, cache: Arc<ModuleCache>) -> Self {
        ModuleLoader {
            fetcher,
            config,
            cache,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    /// The canonical form of `key` under this loader's base.
    pub fn canonical_key(&self, key: &str) -> String {
        canonicalize(key, &self.config.base)
    }

    /// Returns true while a fetch for `key` is outstanding.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(&self.canonical_key(key))
    }

    /// Loads the module document behind `key`.
    ///
    /// Cached documents return without I/O. Concurrent loads of one
    /// canonical key share a single fetch and receive the same document.
    pub async fn load(&self, key: &str) -> LoadResult {
        let key = self.canonical_key(key);

        let pending = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                tracing::debug!(key = %key, "joining in-flight load");
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                if let Some(document) = self.cache.get(&key) {
                    tracing::trace!(key = %key, "cache hit");
                    return Ok(document);
                }
                let pending = self.spawn_fetch(key.clone()).shared();
                entry.insert(pending.clone());
                pending
            }
        };

        pending.await
    }

    /// Loads `key` and returns its component `name`.
    pub async fn load_component(&self, key: &str, name: &str) -> Result<Value, LoadError> {
        let document = self.load(key).await?;
        document
            .component(name)
            .cloned()
            .ok_or_else(|| LoadError::ComponentNotFound {
                key: document.key.clone(),
                name: name.to_string(),
            })
    }

    fn spawn_fetch(&self, key: String) -> BoxFuture<'static, LoadResult> {
        let fetcher = Arc::clone(&self.fetcher);
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        let task_key = key.clone();

        let task = tokio::spawn(async move {
            let key = task_key;
            let result = fetch_document(fetcher.as_ref(), &key).await.map(Arc::new);

            if let Entry::Occupied(entry) = in_flight.entry(key.clone()) {
                match &result {
                    Ok(document) => {
                        cache.insert(key.clone(), Arc::clone(document));
                        tracing::info!(key = %key, hash = %document.hash, "module loaded");
                    }
                    Err(err) => tracing::warn!(key = %key, "module load failed: {}", err),
                }
                entry.remove();
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|join_err| {
                Err(LoadError::LoadFailed {
                    key,
                    status: None,
                    reason: format!("load task failed: {}", join_err),
                })
            })
        }
        .boxed()
    }
}

async fn fetch_document(fetcher: &dyn Fetcher, key: &str) -> Result<ModuleDocument, LoadError> {
    tracing::debug!(key, "fetching module");
    let response = fetcher
        .fetch(key)
        .await
        .map_err(|err| LoadError::LoadFailed {
            key: key.to_string(),
            status: None,
            reason: err.to_string(),
        })?;

    if !response.ok {
        return Err(LoadError::LoadFailed {
            key: key.to_string(),
            status: Some(response.status),
            reason: format!("status {}", response.status),
        });
    }
    parse_document(key, &response.body)
}

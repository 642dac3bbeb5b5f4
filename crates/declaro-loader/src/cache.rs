//! Cache of loaded module documents, keyed by canonical key.
//!
//! The cache is an explicit object owned by whoever builds the loader.
//! Share one `Arc<ModuleCache>` between loaders to share documents.

use std::sync::Arc;

use dashmap::DashMap;

use declaro_core::ModuleDocument;

#[derive(Debug, Default)]
pub struct ModuleCache {
    entries: DashMap<String, Arc<ModuleDocument>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        ModuleCache {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<ModuleDocument>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn insert(&self, key: String, document: Arc<ModuleDocument>) {
        self.entries.insert(key, document);
    }

    /// Drops one entry so the next load fetches again. Returns whether the
    /// key was cached.
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

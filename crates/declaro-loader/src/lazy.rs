//! A single lazily-loaded module with an observable state machine.
//!
//! ```text
//! idle ──load──> loading ──ok──> loaded
//!                   └────err──> error
//! any ──reset──> idle
//! ```
//!
//! Subscribers are notified on every transition. A load that completes
//! after a `reset` is discarded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use declaro_core::ModuleDocument;

use crate::error::LoadError;
use crate::loader::ModuleLoader;

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState {
    Idle,
    Loading,
    Loaded(Arc<ModuleDocument>),
    Error(LoadError),
}

impl LoadState {
    pub fn name(&self) -> &'static str {
        match self {
            LoadState::Idle => "idle",
            LoadState::Loading => "loading",
            LoadState::Loaded(_) => "loaded",
            LoadState::Error(_) => "error",
        }
    }
}

type Listener = Arc<dyn Fn(&LoadState) + Send + Sync>;

struct Inner {
    state: LoadState,
    /// Bumped by `reset` so stale completions can be recognized.
    generation: u64,
    next_listener: u64,
    listeners: Vec<(u64, Listener)>,
}

pub struct LazyLoader {
    loader: Arc<ModuleLoader>,
    key: String,
    inner: Mutex<Inner>,
}

impl LazyLoader {
    pub fn new(loader: Arc<ModuleLoader>, key: impl Into<String>) -> Self {
        LazyLoader {
            loader,
            key: key.into(),
            inner: Mutex::new(Inner {
                state: LoadState::Idle,
                generation: 0,
                next_listener: 0,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> LoadState {
        self.lock().state.clone()
    }

    /// Registers `listener` for state transitions. Returns an id for
    /// [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe(&self, listener: impl Fn(&LoadState) + Send + Sync + 'static) -> u64 {
        let mut inner = self.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|(listener_id, _)| *listener_id != id);
        inner.listeners.len() != before
    }

    /// Loads the module, moving `idle → loading → loaded | error`.
    ///
    /// In `loaded` or `error` this returns the settled outcome without
    /// loading again; call [`reset`](Self::reset) to retry. While `loading`
    /// it joins the outstanding load.
    pub async fn load(&self) -> Result<Arc<ModuleDocument>, LoadError> {
        let generation = {
            let mut inner = self.lock();
            match &inner.state {
                LoadState::Loaded(document) => return Ok(Arc::clone(document)),
                LoadState::Error(err) => return Err(err.clone()),
                LoadState::Loading => inner.generation,
                LoadState::Idle => {
                    let generation = inner.generation;
                    let listeners = Self::enter(&mut inner, LoadState::Loading);
                    drop(inner);
                    Self::emit(&listeners, &LoadState::Loading);
                    generation
                }
            }
        };

        let result = self.loader.load(&self.key).await;

        let next = match &result {
            Ok(document) => LoadState::Loaded(Arc::clone(document)),
            Err(err) => LoadState::Error(err.clone()),
        };
        let listeners = {
            let mut inner = self.lock();
            if inner.generation == generation && inner.state == LoadState::Loading {
                Some(Self::enter(&mut inner, next.clone()))
            } else {
                None
            }
        };
        if let Some(listeners) = listeners {
            Self::emit(&listeners, &next);
        }
        result
    }

    /// Returns to `idle` from any state. An outstanding load keeps running
    /// in the loader but its outcome is not applied here.
    pub fn reset(&self) {
        let listeners = {
            let mut inner = self.lock();
            inner.generation += 1;
            if inner.state == LoadState::Idle {
                return;
            }
            Self::enter(&mut inner, LoadState::Idle)
        };
        Self::emit(&listeners, &LoadState::Idle);
    }

    /// Sets the state and snapshots the listeners to call once the lock is
    /// released.
    fn enter(inner: &mut Inner, state: LoadState) -> Vec<Listener> {
        tracing::debug!(from = inner.state.name(), to = state.name(), "lazy module transition");
        inner.state = state;
        inner
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn emit(listeners: &[Listener], state: &LoadState) {
        for listener in listeners {
            listener(state);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

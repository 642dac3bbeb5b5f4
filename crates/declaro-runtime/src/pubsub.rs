//! Keyed publish/subscribe registry.
//!
//! [`Registry`] maps a key to an ordered set of callbacks. It backs both the
//! reactive graph's per-identifier subscribers and the runtime's lifecycle
//! event bus. Emission iterates over a snapshot of the callbacks, so a
//! callback may subscribe or unsubscribe (itself included) while being
//! invoked without disturbing the current pass.

use std::cell::RefCell;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

type Callback<A> = Rc<dyn Fn(&A)>;

struct Inner<K, A: ?Sized> {
    next_id: u64,
    entries: IndexMap<K, IndexMap<u64, Callback<A>>>,
}

/// A single-threaded keyed callback registry.
pub struct Registry<K, A: ?Sized> {
    inner: Rc<RefCell<Inner<K, A>>>,
}

impl<K, A> Registry<K, A>
where
    K: Hash + Eq + Clone + 'static,
    A: ?Sized + 'static,
{
    pub fn new() -> Self {
        Registry {
            inner: Rc::new(RefCell::new(Inner {
                next_id: 0,
                entries: IndexMap::new(),
            })),
        }
    }

    /// Registers `callback` under `key`, returning its removal handle.
    pub fn subscribe(&self, key: K, callback: impl Fn(&A) + 'static) -> Unsubscribe {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .entries
                .entry(key.clone())
                .or_default()
                .insert(id, Rc::new(callback));
            id
        };

        let weak: Weak<RefCell<Inner<K, A>>> = Rc::downgrade(&self.inner);
        Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.borrow_mut();
                if let Some(callbacks) = inner.entries.get_mut(&key) {
                    callbacks.shift_remove(&id);
                    if callbacks.is_empty() {
                        inner.entries.shift_remove(&key);
                    }
                }
            }
        })
    }

    /// Invokes every callback registered under `key`, in registration order,
    /// over a snapshot taken before the first call. Returns the number of
    /// callbacks invoked.
    pub fn emit(&self, key: &K, arg: &A) -> usize {
        let snapshot: Vec<Callback<A>> = match self.inner.borrow().entries.get(key) {
            Some(callbacks) => callbacks.values().cloned().collect(),
            None => return 0,
        };
        for callback in &snapshot {
            callback(arg);
        }
        snapshot.len()
    }

    pub fn count(&self, key: &K) -> usize {
        self.inner
            .borrow()
            .entries
            .get(key)
            .map_or(0, IndexMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().entries.is_empty()
    }

    /// Drops every registration. Outstanding [`Unsubscribe`] handles become
    /// no-ops.
    pub fn clear(&self) {
        // Move the callbacks out before dropping them: a callback's captured
        // state may itself touch the registry on drop.
        let entries = std::mem::take(&mut self.inner.borrow_mut().entries);
        drop(entries);
    }
}

impl<K, A> Default for Registry<K, A>
where
    K: Hash + Eq + Clone + 'static,
    A: ?Sized + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, A: ?Sized> Clone for Registry<K, A> {
    /// Clones share the same underlying registrations.
    fn clone(&self) -> Self {
        Registry {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Removal handle returned by [`Registry::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`Unsubscribe::unsubscribe`] to remove it.
#[must_use = "dropping the handle keeps the subscription; call unsubscribe() to remove it"]
pub struct Unsubscribe {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Unsubscribe {
    fn new(remove: impl FnOnce() + 'static) -> Self {
        Unsubscribe {
            remove: Some(Box::new(remove)),
        }
    }

    /// Removes the subscription. Safe to call after the registry is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

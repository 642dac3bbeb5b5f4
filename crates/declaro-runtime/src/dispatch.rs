//! Action dispatcher.
//!
//! Dispatching an action binds its parameters positionally, applies its
//! mutations inside one graph batch, then runs its follow-up effects with
//! the same bindings. Subscribers see one notification per touched
//! identifier, after the last mutation.
//!
//! A failing mutation stops the action: earlier mutations stay applied and
//! are flushed, later ones and all follow-ups are skipped, and the error is
//! returned to the caller.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use declaro_core::ActionDef;

use crate::error::RuntimeError;
use crate::graph::{EffectHost, ReactiveGraph};
use crate::resolver::Bindings;

/// The action registry plus its executor.
pub struct Dispatcher {
    graph: Rc<ReactiveGraph>,
    actions: RefCell<IndexMap<String, Rc<ActionDef>>>,
}

impl Dispatcher {
    /// Creates a dispatcher over `graph` and installs it as the graph's
    /// executor for `dispatch` effect bodies.
    pub fn install(graph: Rc<ReactiveGraph>) -> Rc<Self> {
        let dispatcher = Rc::new(Dispatcher {
            graph: Rc::clone(&graph),
            actions: RefCell::new(IndexMap::new()),
        });
        let host: Rc<dyn EffectHost> = dispatcher.clone();
        graph.set_effect_host(Rc::downgrade(&host));
        dispatcher
    }

    pub fn define_action(&self, id: &str, def: ActionDef) -> Result<(), RuntimeError> {
        let mut actions = self.actions.borrow_mut();
        if actions.contains_key(id) {
            return Err(RuntimeError::DuplicateIdentifier { id: id.to_string() });
        }
        actions.insert(id.to_string(), Rc::new(def));
        Ok(())
    }

    /// Replaces the whole registry. A dispatch already running keeps the
    /// definition it started with.
    pub fn replace_actions(&self, actions: &IndexMap<String, ActionDef>) {
        *self.actions.borrow_mut() = actions
            .iter()
            .map(|(id, def)| (id.clone(), Rc::new(def.clone())))
            .collect();
    }

    pub fn action_ids(&self) -> Vec<String> {
        self.actions.borrow().keys().cloned().collect()
    }

    pub fn has_action(&self, id: &str) -> bool {
        self.actions.borrow().contains_key(id)
    }

    pub fn clear(&self) {
        self.actions.borrow_mut().clear();
    }

    /// Runs action `name` with positional `args`. Missing arguments bind to
    /// `null`.
    pub fn dispatch(&self, name: &str, args: &[Value]) -> Result<(), RuntimeError> {
        let def = self
            .actions
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::ActionUndefined {
                action: name.to_string(),
            })?;
        tracing::debug!(action = name, args = args.len(), "dispatch");

        let graph = self.graph.as_ref();
        let scope = Bindings::positional(graph, &def.params, args);
        graph.batch(|| graph.apply_mutations(&def.mutations, &scope))??;

        for run in &def.effects {
            graph.run_nested(name, run, &scope)?;
        }
        Ok(())
    }
}

impl EffectHost for Dispatcher {
    fn dispatch_action(&self, action: &str, args: &[Value]) -> Result<(), RuntimeError> {
        self.dispatch(action, args)
    }
}

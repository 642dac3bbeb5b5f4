//! The runtime facade: one program instance with its graph, dispatcher,
//! component registry, UI tree and lifecycle events.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use declaro_core::{HotMessage, ModuleDocument, ProgramDef};

use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::error::RuntimeError;
use crate::events::{ErrorOrigin, EventBus, EventKind, RuntimeEvent};
use crate::graph::{Mutation, ReactiveGraph, ScheduledEffect};
use crate::hot::UpdateReport;
use crate::pubsub::Unsubscribe;

/// An external renderer for the program's UI tree.
pub trait RenderTarget {
    fn render(&self, root: &Value);
}

/// A live program instance.
pub struct Runtime {
    pub(crate) graph: Rc<ReactiveGraph>,
    pub(crate) dispatcher: Rc<Dispatcher>,
    pub(crate) events: EventBus,
    pub(crate) components: RefCell<IndexMap<String, Value>>,
    root: RefCell<Option<Value>>,
    target: RefCell<Option<Box<dyn RenderTarget>>>,
}

impl Runtime {
    /// Builds a runtime from a validated program definition.
    ///
    /// Definition order is state, computed, invariants, actions, then
    /// effects, so `watch` effects running at definition can read every
    /// node and dispatch every action.
    pub fn new(def: ProgramDef, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        def.validate()?;

        let events = EventBus::new();
        let graph = Rc::new(ReactiveGraph::new(config, events.clone()));
        let dispatcher = Dispatcher::install(Rc::clone(&graph));

        for (id, state) in def.state {
            graph.define_state(&id, state)?;
        }
        for (id, computed) in def.computed {
            graph.define_computed(&id, computed)?;
        }
        graph.register_invariants(def.invariants);
        for (id, action) in def.actions {
            dispatcher.define_action(&id, action)?;
        }

        let runtime = Runtime {
            graph,
            dispatcher,
            events,
            components: RefCell::new(def.components),
            root: RefCell::new(def.root),
            target: RefCell::new(None),
        };
        for (id, effect) in def.effects {
            runtime.graph.define_effect(&id, effect)?;
        }
        tracing::debug!(
            states = runtime.graph.state_ids().len(),
            actions = runtime.dispatcher.action_ids().len(),
            "runtime ready"
        );
        Ok(runtime)
    }

    /// Parses a program document and builds a runtime from it.
    pub fn from_json(text: &str, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Runtime::new(ProgramDef::from_json(text)?, config)
    }

    pub fn graph(&self) -> &ReactiveGraph {
        &self.graph
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // -----------------------------------------------------------------------
    // Values
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Result<Value, RuntimeError> {
        self.graph.get(id)
    }

    pub fn set(&self, id: &str, value: Value) -> Result<(), RuntimeError> {
        self.graph.set(id, value)
    }

    pub fn mutate(&self, id: &str, mutation: Mutation) -> Result<(), RuntimeError> {
        self.graph.mutate(id, mutation)
    }

    pub fn subscribe(&self, id: &str, callback: impl Fn() + 'static) -> Unsubscribe {
        self.graph.subscribe(id, callback)
    }

    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R, RuntimeError> {
        self.graph.batch(f)
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.graph.snapshot()
    }

    pub fn dispatch(&self, action: &str, args: &[Value]) -> Result<(), RuntimeError> {
        self.dispatcher.dispatch(action, args)
    }

    /// Listens on a lifecycle or diagnostic channel.
    pub fn on(&self, kind: EventKind, callback: impl Fn(&RuntimeEvent) + 'static) -> Unsubscribe {
        self.events.on(kind, callback)
    }

    // -----------------------------------------------------------------------
    // Components and UI tree
    // -----------------------------------------------------------------------

    pub fn component(&self, name: &str) -> Result<Value, RuntimeError> {
        self.components
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::ComponentNotFound {
                name: name.to_string(),
            })
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.borrow().keys().cloned().collect()
    }

    pub fn root(&self) -> Option<Value> {
        self.root.borrow().clone()
    }

    /// Stores a new UI tree and re-renders it if a target is attached.
    pub(crate) fn replace_root(&self, root: Value) {
        *self.root.borrow_mut() = Some(root);
        self.render();
    }

    fn render(&self) {
        let root = self.root.borrow().clone();
        if let (Some(target), Some(root)) = (self.target.borrow().as_ref(), root) {
            target.render(&root);
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Attaches a render target, renders the current tree, then runs the
    /// effects waiting for attach.
    pub fn attach(&self, target: Box<dyn RenderTarget>) {
        *self.target.borrow_mut() = Some(target);
        self.render();
        self.graph.attach();
    }

    pub fn detach(&self) {
        self.target.borrow_mut().take();
        self.graph.detach();
    }

    pub fn is_attached(&self) -> bool {
        self.target.borrow().is_some()
    }

    /// Releases subscriptions, effects, actions, listeners and the render
    /// target. Idempotent.
    pub fn dispose(&self) {
        self.graph.dispose();
        self.dispatcher.clear();
        self.events.clear();
        self.target.borrow_mut().take();
    }

    pub fn scheduled_effects(&self) -> Vec<ScheduledEffect> {
        self.graph.scheduled_effects()
    }

    /// Re-fires one effect; used by the embedder's timer for `interval`
    /// and `timeout` effects.
    pub fn run_effect(&self, id: &str) -> Result<(), RuntimeError> {
        self.graph.run_effect(id)
    }

    // -----------------------------------------------------------------------
    // Transport
    // -----------------------------------------------------------------------

    /// Routes one transport message.
    pub fn handle_message(&self, message: HotMessage) -> Result<(), RuntimeError> {
        match message {
            HotMessage::Update { payload } => self.apply_update(payload).map(|_| ()),
            HotMessage::FullReload => {
                tracing::info!("full reload requested");
                self.events.emit(RuntimeEvent::FullReload);
                Ok(())
            }
            HotMessage::Error { payload } => {
                self.events.emit(RuntimeEvent::Error {
                    origin: ErrorOrigin::Transport,
                    detail: payload,
                });
                Ok(())
            }
            HotMessage::Connected => {
                self.events.emit(RuntimeEvent::Connected);
                Ok(())
            }
            HotMessage::Disconnected => {
                self.events.emit(RuntimeEvent::Disconnected);
                Ok(())
            }
        }
    }

    /// Consumes messages until the channel closes. Publishes `connected`
    /// before the first message and `disconnected` after the last; update
    /// failures are already published by [`Runtime::apply_update`].
    pub async fn serve_updates(&self, mut rx: mpsc::Receiver<HotMessage>) {
        self.events.emit(RuntimeEvent::Connected);
        while let Some(message) = rx.recv().await {
            if let Err(err) = self.handle_message(message) {
                tracing::debug!("update message rejected: {}", err);
            }
        }
        self.events.emit(RuntimeEvent::Disconnected);
    }

    /// Registers a loaded module's components (merged over existing ones)
    /// and applies its update, if any.
    pub fn apply_module(&self, document: &ModuleDocument) -> Result<Option<UpdateReport>, RuntimeError> {
        {
            let mut components = self.components.borrow_mut();
            for (name, component) in &document.components {
                components.insert(name.clone(), component.clone());
            }
        }
        tracing::info!(key = %document.key, components = document.components.len(), "module applied");
        match &document.update {
            Some(update) => self.apply_update(update.clone()).map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.dispose();
    }
}

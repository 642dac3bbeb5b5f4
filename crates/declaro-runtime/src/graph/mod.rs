//! The reactive graph: state, computed and effect nodes with batched
//! notification.
//!
//! # Model
//!
//! - **State** nodes hold a value and are written through [`ReactiveGraph::set`]
//!   and [`ReactiveGraph::mutate`].
//! - **Computed** nodes store no value. Every [`ReactiveGraph::get`]
//!   re-evaluates the expression, so a computed read can never observe a
//!   stale cache after a partial update.
//! - **Effect** nodes react to notifications (`watch`) or to attachment to a
//!   render target (`mount`, `interval`, `timeout`). See [`effects`].
//!
//! # Notification order
//!
//! Writes mark their identifier dirty. When the outermost
//! [`ReactiveGraph::batch`] returns, the dirty identifiers are flushed once
//! each, in first-dirtied order:
//!
//! 1. direct subscribers of every dirty identifier,
//! 2. subscribers of every computed node depending on them, directly or
//!    through other computed nodes, each at most once,
//! 3. `watch` effects watching any notified identifier, each at most once.
//!
//! A write outside any batch is a batch of one.
//!
//! # Threading
//!
//! The graph is single-threaded (`Rc`/`RefCell`). No `RefCell` borrow is held
//! while a subscriber, effect or expression runs, so callbacks may read and
//! write the graph re-entrantly.

pub mod effects;
pub mod invariants;
pub mod mutation;

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde_json::{Map, Value};

use declaro_core::{ComputedDef, InvariantDef, StateDef};

use crate::config::{InvariantPolicy, RuntimeConfig};
use crate::error::RuntimeError;
use crate::events::{ErrorOrigin, EventBus, RuntimeEvent};
use crate::pubsub::{Registry, Unsubscribe};
use crate::resolver::{self, values_equal, Scope};

pub use effects::{EffectHost, EffectStatus, ScheduledEffect};
pub use mutation::Mutation;

use effects::EffectNode;

/// A live state node.
#[derive(Debug, Clone)]
pub(crate) struct StateNode {
    pub def: StateDef,
    pub value: Value,
}

#[derive(Default)]
pub(crate) struct Nodes {
    pub states: IndexMap<String, StateNode>,
    pub computed: IndexMap<String, Rc<ComputedDef>>,
    pub effects: IndexMap<String, EffectNode>,
    pub invariants: Vec<InvariantDef>,
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    /// Dirty identifiers in first-dirtied order.
    pending: IndexSet<String>,
    /// Pre-batch values of written states (rollback policy only).
    snapshot: IndexMap<String, Value>,
    /// Pre-batch state nodes, captured before a structural change
    /// (rollback policy only). Supersedes `snapshot` on restore.
    states_before: Option<IndexMap<String, StateNode>>,
    /// Pre-batch computed nodes, captured before a redefinition
    /// (rollback policy only).
    computed_before: Option<IndexMap<String, Rc<ComputedDef>>>,
}

/// Everything a rolled-back batch needs to restore.
struct Rollback {
    values: IndexMap<String, Value>,
    states: Option<IndexMap<String, StateNode>>,
    computed: Option<IndexMap<String, Rc<ComputedDef>>>,
}

/// Outcome of reconciling the state section of a hot update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateReconciliation {
    pub preserved: Vec<String>,
    pub reset: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// The reactive dependency graph.
pub struct ReactiveGraph {
    pub(crate) nodes: RefCell<Nodes>,
    subscribers: Registry<String, ()>,
    batch: RefCell<BatchState>,
    pub(crate) events: EventBus,
    pub(crate) host: RefCell<Option<Weak<dyn EffectHost>>>,
    pub(crate) config: RuntimeConfig,
    pub(crate) attached: Cell<bool>,
    pub(crate) effect_depth: Cell<usize>,
    /// Nesting of notification flushes started from callbacks.
    deliver_depth: Cell<usize>,
    /// Computed identifiers currently being evaluated (cycle guard).
    resolving: RefCell<Vec<String>>,
    disposed: Cell<bool>,
}

impl ReactiveGraph {
    pub fn new(config: RuntimeConfig, events: EventBus) -> Self {
        ReactiveGraph {
            nodes: RefCell::new(Nodes::default()),
            subscribers: Registry::new(),
            batch: RefCell::new(BatchState::default()),
            events,
            host: RefCell::new(None),
            config,
            attached: Cell::new(false),
            effect_depth: Cell::new(0),
            deliver_depth: Cell::new(0),
            resolving: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Definition
    // -----------------------------------------------------------------------

    /// Registers a state node initialized to `def.initial`.
    pub fn define_state(&self, id: &str, def: StateDef) -> Result<(), RuntimeError> {
        if self.is_defined(id) {
            return Err(RuntimeError::DuplicateIdentifier { id: id.to_string() });
        }
        if !def.ty.matches(&def.initial) {
            return Err(RuntimeError::type_mismatch(id, def.ty.name(), &def.initial));
        }
        let value = def.initial.clone();
        self.nodes
            .borrow_mut()
            .states
            .insert(id.to_string(), StateNode { def, value });
        Ok(())
    }

    /// Registers a computed node. Fails if its declared dependencies would
    /// close a cycle among computed nodes.
    pub fn define_computed(&self, id: &str, def: ComputedDef) -> Result<(), RuntimeError> {
        if self.is_defined(id) {
            return Err(RuntimeError::DuplicateIdentifier { id: id.to_string() });
        }
        {
            let nodes = self.nodes.borrow();
            let candidate = nodes
                .computed
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_ref()))
                .chain(std::iter::once((id, &def)));
            if let Some(path) = find_cycle(candidate) {
                return Err(RuntimeError::DependencyCycle { path });
            }
        }
        self.nodes
            .borrow_mut()
            .computed
            .insert(id.to_string(), Rc::new(def));
        Ok(())
    }

    /// Returns true if `id` names a state or computed node.
    pub fn is_defined(&self, id: &str) -> bool {
        let nodes = self.nodes.borrow();
        nodes.states.contains_key(id) || nodes.computed.contains_key(id)
    }

    pub fn is_computed(&self, id: &str) -> bool {
        self.nodes.borrow().computed.contains_key(id)
    }

    pub fn state_ids(&self) -> Vec<String> {
        self.nodes.borrow().states.keys().cloned().collect()
    }

    pub fn computed_ids(&self) -> Vec<String> {
        self.nodes.borrow().computed.keys().cloned().collect()
    }

    /// Declared dependencies of a computed node.
    pub fn computed_deps(&self, id: &str) -> Option<Vec<String>> {
        self.nodes
            .borrow()
            .computed
            .get(id)
            .map(|def| def.deps.to_vec())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Returns a state's current value, or evaluates a computed node.
    pub fn get(&self, id: &str) -> Result<Value, RuntimeError> {
        self.lookup(id)?
            .ok_or_else(|| RuntimeError::UnresolvedReference { id: id.to_string() })
    }

    /// Current values of every state node, in definition order.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.nodes
            .borrow()
            .states
            .iter()
            .map(|(id, node)| (id.clone(), node.value.clone()))
            .collect()
    }

    fn evaluate_computed(&self, id: &str, def: &ComputedDef) -> Result<Value, RuntimeError> {
        {
            let stack = self.resolving.borrow();
            if stack.iter().any(|active| active == id) {
                let mut path = stack.clone();
                path.push(id.to_string());
                return Err(RuntimeError::DependencyCycle { path });
            }
        }
        self.resolving.borrow_mut().push(id.to_string());
        let result = resolver::resolve(&def.expr, self);
        self.resolving.borrow_mut().pop();
        result
    }

    /// The current value of a writable state node.
    pub(crate) fn read_state(&self, id: &str) -> Result<Value, RuntimeError> {
        let nodes = self.nodes.borrow();
        if nodes.computed.contains_key(id) {
            return Err(RuntimeError::NotWritable { id: id.to_string() });
        }
        nodes
            .states
            .get(id)
            .map(|node| node.value.clone())
            .ok_or_else(|| RuntimeError::UnresolvedReference { id: id.to_string() })
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Stores `value` and notifies, unless it equals the current value.
    pub fn set(&self, id: &str, value: Value) -> Result<(), RuntimeError> {
        self.batch(|| self.write(id, value))?.map(|_| ())
    }

    /// Applies `mutation` to the current value of `id`, with the graph as
    /// the scope for `filter`/`map` expressions.
    pub fn mutate(&self, id: &str, mutation: Mutation) -> Result<(), RuntimeError> {
        self.mutate_in(id, mutation, self)
    }

    /// Like [`mutate`](Self::mutate), with `scope` layered under the
    /// per-item `item`/`index` bindings.
    pub fn mutate_in(
        &self,
        id: &str,
        mutation: Mutation,
        scope: &dyn Scope,
    ) -> Result<(), RuntimeError> {
        let current = self.read_state(id)?;
        let next = mutation.apply(id, &current, scope)?;
        self.set(id, next)
    }

    /// Returns whether the value changed.
    fn write(&self, id: &str, value: Value) -> Result<bool, RuntimeError> {
        {
            let mut nodes = self.nodes.borrow_mut();
            if nodes.computed.contains_key(id) {
                return Err(RuntimeError::NotWritable { id: id.to_string() });
            }
            let node = nodes
                .states
                .get_mut(id)
                .ok_or_else(|| RuntimeError::UnresolvedReference { id: id.to_string() })?;
            if values_equal(&node.value, &value) {
                return Ok(false);
            }
            let previous = std::mem::replace(&mut node.value, value);
            if self.config.invariant_policy == InvariantPolicy::Rollback {
                self.batch
                    .borrow_mut()
                    .snapshot
                    .entry(id.to_string())
                    .or_insert(previous);
            }
        }
        self.notify(id);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Subscription and notification
    // -----------------------------------------------------------------------

    /// Registers `callback` to run whenever `id` is notified.
    pub fn subscribe(&self, id: &str, callback: impl Fn() + 'static) -> Unsubscribe {
        self.subscribers
            .subscribe(id.to_string(), move |_: &()| callback())
    }

    pub fn subscriber_count(&self, id: &str) -> usize {
        self.subscribers.count(&id.to_string())
    }

    /// Notifies `id`: deferred to the end of the current batch if one is
    /// open, delivered immediately otherwise.
    pub fn notify(&self, id: &str) {
        {
            let mut batch = self.batch.borrow_mut();
            if batch.depth > 0 {
                batch.pending.insert(id.to_string());
                return;
            }
        }
        self.deliver(&[id.to_string()]);
    }

    /// Runs `f` with notifications deferred, then flushes each distinct
    /// dirty identifier once, in first-dirtied order. Nested batches flush
    /// with the outermost one.
    ///
    /// Under [`InvariantPolicy::Rollback`] a failing invariant restores the
    /// pre-batch values, drops the pending notifications and fails with
    /// [`RuntimeError::InvariantViolation`].
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R, RuntimeError> {
        self.batch.borrow_mut().depth += 1;
        let out = f();

        let (pending, snapshot) = {
            let mut batch = self.batch.borrow_mut();
            batch.depth -= 1;
            if batch.depth > 0 {
                return Ok(out);
            }
            (
                std::mem::take(&mut batch.pending),
                Rollback {
                    values: std::mem::take(&mut batch.snapshot),
                    states: batch.states_before.take(),
                    computed: batch.computed_before.take(),
                },
            )
        };
        let structural = snapshot.states.is_some() || snapshot.computed.is_some();
        if pending.is_empty() && !structural {
            return Ok(out);
        }
        let pending: Vec<String> = pending.into_iter().collect();

        match self.config.invariant_policy {
            InvariantPolicy::Rollback => {
                if let Some(violation) = self.check_invariants().into_iter().next() {
                    self.restore(snapshot);
                    tracing::warn!(
                        invariant = %violation.name,
                        "invariant violated, batch rolled back: {}",
                        violation.message
                    );
                    self.events
                        .emit(RuntimeEvent::InvariantViolation(violation.clone()));
                    return Err(RuntimeError::InvariantViolation {
                        name: violation.name,
                        message: violation.message,
                    });
                }
                self.deliver(&pending);
            }
            InvariantPolicy::Report => {
                self.deliver(&pending);
                for violation in self.check_invariants() {
                    tracing::warn!(
                        invariant = %violation.name,
                        "invariant violated: {}",
                        violation.message
                    );
                    self.events.emit(RuntimeEvent::InvariantViolation(violation));
                }
            }
        }
        Ok(out)
    }

    fn restore(&self, snapshot: Rollback) {
        let mut nodes = self.nodes.borrow_mut();
        if let Some(computed) = snapshot.computed {
            nodes.computed = computed;
        }
        match snapshot.states {
            Some(states) => nodes.states = states,
            None => {
                for (id, value) in snapshot.values {
                    if let Some(node) = nodes.states.get_mut(&id) {
                        node.value = value;
                    }
                }
            }
        }
    }

    /// Records the pre-batch state nodes before a structural change, so a
    /// rollback can undo removals, additions and retyping as well as
    /// writes. Must be called inside a batch.
    fn capture_states(&self) {
        if self.config.invariant_policy != InvariantPolicy::Rollback {
            return;
        }
        let mut batch = self.batch.borrow_mut();
        if batch.states_before.is_some() {
            return;
        }
        let mut states = self.nodes.borrow().states.clone();
        for (id, value) in &batch.snapshot {
            if let Some(node) = states.get_mut(id) {
                node.value = value.clone();
            }
        }
        batch.states_before = Some(states);
    }

    /// Records the pre-batch computed nodes before a redefinition. Must be
    /// called inside a batch.
    fn capture_computed(&self) {
        if self.config.invariant_policy != InvariantPolicy::Rollback {
            return;
        }
        let mut batch = self.batch.borrow_mut();
        if batch.computed_before.is_none() {
            batch.computed_before = Some(self.nodes.borrow().computed.clone());
        }
    }

    /// Delivers notifications for `ids` in three phases: direct
    /// subscribers, dependent-computed subscribers, watching effects.
    ///
    /// Flushes nested through subscriber writes are bounded by
    /// `max_effect_depth`; past it the notification is dropped and
    /// `EffectDepthExceeded` is reported. The write itself stands.
    fn deliver(&self, ids: &[String]) {
        if self.disposed.get() {
            return;
        }
        let depth = self.deliver_depth.get();
        if depth >= self.config.max_effect_depth {
            let err = RuntimeError::EffectDepthExceeded {
                effect: format!("notify {}", ids.join(",")),
                limit: self.config.max_effect_depth,
            };
            self.report_error(ErrorOrigin::Effect, &err);
            return;
        }
        self.deliver_depth.set(depth + 1);
        self.deliver_phases(ids);
        self.deliver_depth.set(depth);
    }

    fn deliver_phases(&self, ids: &[String]) {
        tracing::debug!(ids = ?ids, "flushing notifications");

        for id in ids {
            self.subscribers.emit(id, &());
        }

        let mut notified: HashSet<String> = ids.iter().cloned().collect();
        let mut touched: Vec<String> = ids.to_vec();
        for id in ids {
            for dependent in self.dependents_of(id) {
                if notified.insert(dependent.clone()) {
                    self.subscribers.emit(&dependent, &());
                    touched.push(dependent);
                }
            }
        }

        for effect_id in self.watching_effects(&touched) {
            if let Err(err) = self.run_effect(&effect_id) {
                self.report_error(ErrorOrigin::Effect, &err);
            }
        }
    }

    /// Computed nodes depending on `id` directly or transitively, ordered
    /// by dependency distance.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        let nodes = self.nodes.borrow();
        let mut out: Vec<String> = Vec::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for (computed_id, def) in &nodes.computed {
                if computed_id != id
                    && def.deps.iter().any(|dep| *dep == current)
                    && !out.contains(computed_id)
                {
                    out.push(computed_id.clone());
                    queue.push_back(computed_id.clone());
                }
            }
        }
        out
    }

    pub(crate) fn report_error(&self, origin: ErrorOrigin, err: &RuntimeError) {
        tracing::warn!(?origin, "{}", err);
        self.events.emit(RuntimeEvent::from_error(origin, err));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Releases every subscription and effect. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.subscribers.clear();
        self.nodes.borrow_mut().effects.clear();
        self.host.borrow_mut().take();
        tracing::debug!("reactive graph disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    // -----------------------------------------------------------------------
    // Reconciling redefinition (hot update)
    // -----------------------------------------------------------------------

    /// Reconciles the live state nodes with `incoming`.
    ///
    /// Live values compatible with the incoming declared type are preserved;
    /// incompatible ones reset to the incoming initial value. New ids are
    /// defined, ids absent from `incoming` are removed. Reset and added ids
    /// are notified in one batch.
    pub(crate) fn reconcile_state(
        &self,
        incoming: &IndexMap<String, StateDef>,
    ) -> Result<StateReconciliation, RuntimeError> {
        // Validate everything before touching live nodes.
        {
            let nodes = self.nodes.borrow();
            for (id, def) in incoming {
                if !def.ty.matches(&def.initial) {
                    return Err(RuntimeError::type_mismatch(id, def.ty.name(), &def.initial));
                }
                if nodes.computed.contains_key(id) {
                    return Err(RuntimeError::DuplicateIdentifier { id: id.clone() });
                }
            }
        }

        let mut outcome = StateReconciliation::default();
        self.batch(|| {
            self.capture_states();
            let mut changed = Vec::new();
            {
                let mut nodes = self.nodes.borrow_mut();

                let stale: Vec<String> = nodes
                    .states
                    .keys()
                    .filter(|id| !incoming.contains_key(*id))
                    .cloned()
                    .collect();
                for id in stale {
                    nodes.states.shift_remove(&id);
                    outcome.removed.push(id);
                }

                for (id, def) in incoming {
                    match nodes.states.get_mut(id) {
                        Some(node) if def.ty.matches(&node.value) => {
                            node.def = def.clone();
                            outcome.preserved.push(id.clone());
                        }
                        Some(node) => {
                            node.def = def.clone();
                            node.value = def.initial.clone();
                            outcome.reset.push(id.clone());
                            changed.push(id.clone());
                        }
                        None => {
                            nodes.states.insert(
                                id.clone(),
                                StateNode {
                                    def: def.clone(),
                                    value: def.initial.clone(),
                                },
                            );
                            outcome.added.push(id.clone());
                            changed.push(id.clone());
                        }
                    }
                }
            }
            for id in &changed {
                self.notify(id);
            }
        })?;
        Ok(outcome)
    }

    /// Replaces every computed node with `incoming` and notifies the
    /// redefined ids. Returns the ids that were removed.
    pub(crate) fn replace_computed(
        &self,
        incoming: &IndexMap<String, ComputedDef>,
    ) -> Result<Vec<String>, RuntimeError> {
        if let Some(path) = find_cycle(incoming.iter().map(|(k, v)| (k.as_str(), v))) {
            return Err(RuntimeError::DependencyCycle { path });
        }
        {
            let nodes = self.nodes.borrow();
            if let Some(id) = incoming.keys().find(|id| nodes.states.contains_key(*id)) {
                return Err(RuntimeError::DuplicateIdentifier { id: id.clone() });
            }
        }

        self.batch(|| {
            self.capture_computed();
            let removed: Vec<String> = {
                let mut nodes = self.nodes.borrow_mut();
                let removed = nodes
                    .computed
                    .keys()
                    .filter(|id| !incoming.contains_key(*id))
                    .cloned()
                    .collect();
                nodes.computed = incoming
                    .iter()
                    .map(|(id, def)| (id.clone(), Rc::new(def.clone())))
                    .collect();
                removed
            };
            for id in incoming.keys() {
                self.notify(id);
            }
            removed
        })
    }
}

impl Scope for ReactiveGraph {
    fn lookup(&self, name: &str) -> Result<Option<Value>, RuntimeError> {
        let def = {
            let nodes = self.nodes.borrow();
            if let Some(node) = nodes.states.get(name) {
                return Ok(Some(node.value.clone()));
            }
            match nodes.computed.get(name) {
                Some(def) => Rc::clone(def),
                None => return Ok(None),
            }
        };
        self.evaluate_computed(name, &def).map(Some)
    }
}

/// Finds a cycle among computed declarations, returning its members.
///
/// Edges run from each declared dependency to the computed node. Only
/// computed-to-computed edges can close a cycle, but state ids are included
/// harmlessly as sources.
fn find_cycle<'a>(defs: impl Iterator<Item = (&'a str, &'a ComputedDef)>) -> Option<Vec<String>> {
    let mut graph: DiGraphMap<&'a str, ()> = DiGraphMap::new();
    for (id, def) in defs {
        graph.add_node(id);
        for dep in &def.deps {
            graph.add_edge(dep.as_str(), id, ());
        }
    }
    tarjan_scc(&graph).into_iter().find_map(|component| {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|node| graph.contains_edge(*node, *node));
        is_cycle.then(|| {
            let mut path: Vec<String> = component.iter().map(|s| s.to_string()).collect();
            path.sort();
            path
        })
    })
}

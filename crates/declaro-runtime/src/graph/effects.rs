//! Effect nodes: activation, execution and the attach lifecycle.
//!
//! `watch` effects run once when defined and again whenever a watched
//! identifier (or a computed node depending on it) is notified. `mount`,
//! `interval` and `timeout` effects stay [`EffectStatus::Defined`] until the
//! graph is attached to a render target; the embedder re-fires `interval`
//! and `timeout` effects through [`ReactiveGraph::run_effect`] using the
//! periods listed by [`ReactiveGraph::scheduled_effects`].

use std::rc::{Rc, Weak};

use serde::Serialize;
use serde_json::Value;

use declaro_core::{EffectDef, EffectRun, MutationDef, Trigger};

use crate::error::RuntimeError;
use crate::events::{ErrorOrigin, RuntimeEvent};
use crate::resolver::{self, Scope};

use super::{Mutation, ReactiveGraph};

/// Executes `dispatch` effect bodies. Implemented by the action dispatcher
/// and installed with [`ReactiveGraph::set_effect_host`].
pub trait EffectHost {
    fn dispatch_action(&self, action: &str, args: &[Value]) -> Result<(), RuntimeError>;
}

/// Lifecycle of an effect node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EffectStatus {
    /// Registered, waiting for attach.
    Defined,
    /// Has run at least once and reacts to its trigger.
    Active,
}

pub(crate) struct EffectNode {
    pub def: Rc<EffectDef>,
    pub status: EffectStatus,
}

/// An active effect the embedder must re-fire on a timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledEffect {
    pub id: String,
    pub trigger: Trigger,
    pub ms: Option<u64>,
}

impl ReactiveGraph {
    /// Installs the executor for `dispatch` effect bodies.
    pub fn set_effect_host(&self, host: Weak<dyn EffectHost>) {
        *self.host.borrow_mut() = Some(host);
    }

    /// Registers an effect. `watch` effects run immediately; the other
    /// triggers run now only if the graph is already attached.
    ///
    /// If that first run fails the effect is unregistered and the error
    /// returned. State written before the failure is kept.
    pub fn define_effect(&self, id: &str, def: EffectDef) -> Result<(), RuntimeError> {
        if self.nodes.borrow().effects.contains_key(id) {
            return Err(RuntimeError::DuplicateIdentifier { id: id.to_string() });
        }
        self.nodes.borrow_mut().effects.insert(
            id.to_string(),
            EffectNode {
                def: Rc::new(def),
                status: EffectStatus::Defined,
            },
        );
        self.activate_effect(id).inspect_err(|_| {
            self.nodes.borrow_mut().effects.shift_remove(id);
        })
    }

    pub fn effect_ids(&self) -> Vec<String> {
        self.nodes.borrow().effects.keys().cloned().collect()
    }

    pub fn effect_status(&self, id: &str) -> Option<EffectStatus> {
        self.nodes.borrow().effects.get(id).map(|node| node.status)
    }

    /// Marks the graph attached and runs every effect still waiting for
    /// attach, in definition order. Failures are reported on the error
    /// channel and do not stop the remaining effects.
    pub fn attach(&self) {
        self.attached.set(true);
        let waiting: Vec<String> = self
            .nodes
            .borrow()
            .effects
            .iter()
            .filter(|(_, node)| node.status == EffectStatus::Defined)
            .map(|(id, _)| id.clone())
            .collect();
        for id in waiting {
            if let Err(err) = self.activate_effect(&id) {
                self.report_error(ErrorOrigin::Effect, &err);
            }
        }
    }

    pub fn detach(&self) {
        self.attached.set(false);
    }

    pub fn is_attached(&self) -> bool {
        self.attached.get()
    }

    /// Active `interval` and `timeout` effects, in definition order.
    pub fn scheduled_effects(&self) -> Vec<ScheduledEffect> {
        self.nodes
            .borrow()
            .effects
            .iter()
            .filter(|(_, node)| {
                node.status == EffectStatus::Active
                    && matches!(node.def.trigger, Trigger::Interval | Trigger::Timeout)
            })
            .map(|(id, node)| ScheduledEffect {
                id: id.clone(),
                trigger: node.def.trigger,
                ms: node.def.ms,
            })
            .collect()
    }

    /// Runs effect `id` once, regardless of its trigger.
    pub fn run_effect(&self, id: &str) -> Result<(), RuntimeError> {
        let def = self
            .nodes
            .borrow()
            .effects
            .get(id)
            .map(|node| Rc::clone(&node.def))
            .ok_or_else(|| RuntimeError::UnresolvedReference { id: id.to_string() })?;
        self.execute_effect(id, &def)
    }

    /// Runs an effect body with `scope` as the expression scope.
    pub fn run_body(&self, run: &EffectRun, scope: &dyn Scope) -> Result<(), RuntimeError> {
        match run {
            EffectRun::Mutate { mutations } => {
                self.batch(|| self.apply_mutations(mutations, scope))?
            }
            EffectRun::Dispatch { action, args } => {
                let args = args
                    .iter()
                    .map(|arg| resolver::resolve(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let host = self.host.borrow().as_ref().and_then(Weak::upgrade);
                match host {
                    Some(host) => host.dispatch_action(action, &args),
                    None => Err(RuntimeError::ActionUndefined {
                        action: action.clone(),
                    }),
                }
            }
            EffectRun::Emit { event, value } => {
                let value = resolver::resolve(value, scope)?;
                self.events.emit(RuntimeEvent::Effect {
                    event: event.clone(),
                    value,
                });
                Ok(())
            }
        }
    }

    /// Applies `mutations` in order, stopping at the first failure. The
    /// caller owns the surrounding batch.
    pub(crate) fn apply_mutations(
        &self,
        mutations: &[MutationDef],
        scope: &dyn Scope,
    ) -> Result<(), RuntimeError> {
        for def in mutations {
            let mutation = Mutation::from_def(def, scope)?;
            self.mutate_in(&def.target, mutation, scope)?;
        }
        Ok(())
    }

    /// Removes every effect node.
    pub(crate) fn clear_effects(&self) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        let count = nodes.effects.len();
        nodes.effects.clear();
        count
    }

    /// Effects of `watch` trigger whose watch list intersects `ids`, in
    /// definition order.
    pub(super) fn watching_effects(&self, ids: &[String]) -> Vec<String> {
        self.nodes
            .borrow()
            .effects
            .iter()
            .filter(|(_, node)| {
                node.status == EffectStatus::Active
                    && node.def.trigger == Trigger::Watch
                    && node.def.watch.iter().any(|watched| ids.contains(watched))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn activate_effect(&self, id: &str) -> Result<(), RuntimeError> {
        let def = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(node) = nodes.effects.get_mut(id) else {
                return Ok(());
            };
            if node.status == EffectStatus::Active
                || (node.def.trigger.is_deferred() && !self.attached.get())
            {
                return Ok(());
            }
            node.status = EffectStatus::Active;
            Rc::clone(&node.def)
        };
        self.execute_effect(id, &def)
    }

    fn execute_effect(&self, id: &str, def: &EffectDef) -> Result<(), RuntimeError> {
        self.run_nested(id, &def.run, self)
    }

    /// Runs `run` one nesting level deeper, failing once the configured
    /// depth is reached. `label` names the effect (or action follow-up) in
    /// the error.
    pub(crate) fn run_nested(
        &self,
        label: &str,
        run: &EffectRun,
        scope: &dyn Scope,
    ) -> Result<(), RuntimeError> {
        let depth = self.effect_depth.get();
        if depth >= self.config.max_effect_depth {
            return Err(RuntimeError::EffectDepthExceeded {
                effect: label.to_string(),
                limit: self.config.max_effect_depth,
            });
        }
        tracing::debug!(effect = label, depth, "running effect");
        self.effect_depth.set(depth + 1);
        let result = self.run_body(run, scope);
        self.effect_depth.set(depth);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    use declaro_core::{Expr, MutationKind, StateDef, ValueType};
    use serde_json::json;

    use crate::config::RuntimeConfig;
    use crate::events::{EventBus, EventKind};

    fn graph() -> ReactiveGraph {
        ReactiveGraph::new(RuntimeConfig::default(), EventBus::new())
    }

    fn expr(value: Value) -> Expr {
        Expr::parse(&value).unwrap()
    }

    fn copy_effect(from: &str, to: &str) -> EffectDef {
        EffectDef {
            trigger: Trigger::Watch,
            watch: vec![from.to_string()],
            run: EffectRun::Mutate {
                mutations: vec![MutationDef::new(
                    to,
                    MutationKind::Set,
                    Some(expr(json!({"ref": from}))),
                )],
            },
            ms: None,
        }
    }

    fn emit_effect(trigger: Trigger, event: &str) -> EffectDef {
        EffectDef {
            trigger,
            watch: Vec::new(),
            run: EffectRun::Emit {
                event: event.to_string(),
                value: expr(json!(null)),
            },
            ms: Some(1000),
        }
    }

    #[test]
    fn watch_effect_runs_at_definition_and_on_change() {
        let g = graph();
        g.define_state("a", StateDef::new(ValueType::Number, json!(1))).unwrap();
        g.define_state("b", StateDef::new(ValueType::Number, json!(0))).unwrap();
        g.define_effect("sync", copy_effect("a", "b")).unwrap();

        assert_eq!(g.effect_status("sync"), Some(EffectStatus::Active));
        assert_eq!(g.get("b").unwrap(), json!(1));

        g.set("a", json!(5)).unwrap();
        assert_eq!(g.get("b").unwrap(), json!(5));
    }

    #[test]
    fn watch_effect_runs_once_per_batch() {
        let g = graph();
        g.define_state("a", StateDef::new(ValueType::Number, json!(0))).unwrap();
        let runs = Rc::new(Cell::new(0));
        let r = runs.clone();
        let _h = g.events().on(EventKind::Effect, move |_| r.set(r.get() + 1));

        let mut def = emit_effect(Trigger::Watch, "tick");
        def.watch = vec!["a".into()];
        g.define_effect("log", def).unwrap();
        assert_eq!(runs.get(), 1);

        g.batch(|| {
            g.set("a", json!(1)).unwrap();
            g.set("a", json!(2)).unwrap();
        })
        .unwrap();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn effect_runs_after_all_subscribers() {
        let g = graph();
        g.define_state("a", StateDef::new(ValueType::Number, json!(0))).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));

        let mut def = emit_effect(Trigger::Watch, "after");
        def.watch = vec!["a".into()];
        g.define_effect("e", def).unwrap();

        let l = log.clone();
        let _h = g.events().on(EventKind::Effect, move |_| l.borrow_mut().push("effect"));
        let l = log.clone();
        let _s = g.subscribe("a", move || l.borrow_mut().push("subscriber"));

        g.set("a", json!(1)).unwrap();
        assert_eq!(*log.borrow(), vec!["subscriber", "effect"]);
    }

    #[test]
    fn deferred_effects_wait_for_attach() {
        let g = graph();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _h = g.events().on(EventKind::Effect, move |e| {
            if let RuntimeEvent::Effect { event, .. } = e {
                s.borrow_mut().push(event.clone());
            }
        });

        g.define_effect("m", emit_effect(Trigger::Mount, "mounted")).unwrap();
        g.define_effect("t", emit_effect(Trigger::Interval, "tick")).unwrap();
        assert!(seen.borrow().is_empty());
        assert_eq!(g.effect_status("m"), Some(EffectStatus::Defined));
        assert!(g.scheduled_effects().is_empty());

        g.attach();
        assert_eq!(*seen.borrow(), vec!["mounted", "tick"]);
        assert_eq!(
            g.scheduled_effects(),
            vec![ScheduledEffect {
                id: "t".into(),
                trigger: Trigger::Interval,
                ms: Some(1000)
            }]
        );

        // A second attach does not re-run active effects.
        g.attach();
        assert_eq!(seen.borrow().len(), 2);

        g.run_effect("t").unwrap();
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn runaway_effects_hit_the_depth_limit() {
        let config = RuntimeConfig {
            max_effect_depth: 4,
            ..RuntimeConfig::default()
        };
        let g = ReactiveGraph::new(config, EventBus::new());
        g.define_state("n", StateDef::new(ValueType::Number, json!(0))).unwrap();

        let errors = Rc::new(RefCell::new(Vec::new()));
        let e = errors.clone();
        let _h = g.events().on(EventKind::Error, move |ev| e.borrow_mut().push(ev.clone()));

        // Each run increments the watched state, retriggering itself.
        g.define_effect(
            "spin",
            EffectDef {
                trigger: Trigger::Watch,
                watch: vec!["n".into()],
                run: EffectRun::Mutate {
                    mutations: vec![MutationDef::new(
                        "n",
                        MutationKind::Add,
                        Some(expr(json!(1))),
                    )],
                },
                ms: None,
            },
        )
        .unwrap();

        assert_eq!(g.get("n").unwrap(), json!(4));
        assert_eq!(errors.borrow().len(), 1);
        let detail = match &errors.borrow()[0] {
            RuntimeEvent::Error { detail, .. } => detail.clone(),
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(detail["error"]["EffectDepthExceeded"]["limit"], json!(4));
    }

    #[test]
    fn failed_first_run_unregisters_the_effect() {
        let g = graph();
        g.define_state("n", StateDef::new(ValueType::Number, json!(0))).unwrap();

        let err = g
            .define_effect(
                "save",
                EffectDef {
                    trigger: Trigger::Watch,
                    watch: vec!["n".into()],
                    run: EffectRun::Dispatch {
                        action: "persist".into(),
                        args: Vec::new(),
                    },
                    ms: None,
                },
            )
            .unwrap_err();
        assert_eq!(err, RuntimeError::ActionUndefined { action: "persist".into() });
        assert!(g.effect_ids().is_empty());
        assert_eq!(g.effect_status("save"), None);

        let errors = Rc::new(Cell::new(0));
        let e = errors.clone();
        let _h = g.events().on(EventKind::Error, move |_| e.set(e.get() + 1));
        g.set("n", json!(1)).unwrap();
        assert_eq!(errors.get(), 0);
    }

    #[test]
    fn dispatch_without_host_is_action_undefined() {
        let g = graph();
        let run = EffectRun::Dispatch {
            action: "save".into(),
            args: Vec::new(),
        };
        assert_eq!(
            g.run_body(&run, &g).unwrap_err(),
            RuntimeError::ActionUndefined { action: "save".into() }
        );
    }

    #[test]
    fn dispatch_goes_through_the_host() {
        struct Recorder(RefCell<Vec<(String, Vec<Value>)>>);
        impl EffectHost for Recorder {
            fn dispatch_action(&self, action: &str, args: &[Value]) -> Result<(), RuntimeError> {
                self.0.borrow_mut().push((action.to_string(), args.to_vec()));
                Ok(())
            }
        }

        let g = graph();
        g.define_state("n", StateDef::new(ValueType::Number, json!(3))).unwrap();
        let recorder = Rc::new(Recorder(RefCell::new(Vec::new())));
        let host: Rc<dyn EffectHost> = recorder.clone();
        g.set_effect_host(Rc::downgrade(&host));

        let run = EffectRun::Dispatch {
            action: "save".into(),
            args: vec![expr(json!({"ref": "n"}))],
        };
        g.run_body(&run, &g).unwrap();
        assert_eq!(*recorder.0.borrow(), vec![("save".to_string(), vec![json!(3)])]);
    }

    #[test]
    fn duplicate_effect_id_is_rejected() {
        let g = graph();
        g.define_effect("m", emit_effect(Trigger::Mount, "x")).unwrap();
        assert!(matches!(
            g.define_effect("m", emit_effect(Trigger::Mount, "y")),
            Err(RuntimeError::DuplicateIdentifier { .. })
        ));
    }
}

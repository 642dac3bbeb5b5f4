//! Invariant predicates evaluated after each batch.

use declaro_core::InvariantDef;

use crate::events::InvariantViolation;
use crate::resolver::{self, is_truthy};

use super::ReactiveGraph;

impl ReactiveGraph {
    /// Appends `list` to the registered invariants.
    pub fn register_invariants(&self, list: Vec<InvariantDef>) {
        self.nodes.borrow_mut().invariants.extend(list);
    }

    pub fn invariants(&self) -> Vec<InvariantDef> {
        self.nodes.borrow().invariants.clone()
    }

    pub(crate) fn replace_invariants(&self, list: Vec<InvariantDef>) {
        self.nodes.borrow_mut().invariants = list;
    }

    /// Evaluates every invariant against the current state. A predicate that
    /// fails to evaluate counts as violated.
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let invariants = self.invariants();
        let mut violations = Vec::new();
        for invariant in invariants {
            let message = match resolver::resolve(&invariant.expr, self) {
                Ok(value) if is_truthy(&value) => continue,
                Ok(_) => invariant
                    .message
                    .clone()
                    .unwrap_or_else(|| "predicate evaluated to false".to_string()),
                Err(err) => format!("predicate failed to evaluate: {}", err),
            };
            violations.push(InvariantViolation {
                name: invariant.name,
                message,
            });
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use declaro_core::{Expr, StateDef, ValueType};
    use serde_json::json;

    use crate::config::{InvariantPolicy, RuntimeConfig};
    use crate::error::RuntimeError;
    use crate::events::{EventBus, EventKind, RuntimeEvent};

    use super::*;

    fn non_negative() -> InvariantDef {
        InvariantDef {
            name: "non-negative".into(),
            expr: Expr::parse(&json!({"op": "ge", "args": [{"ref": "count"}, 0]})).unwrap(),
            message: Some("count must not go below zero".into()),
        }
    }

    fn graph(policy: InvariantPolicy) -> ReactiveGraph {
        let config = RuntimeConfig {
            invariant_policy: policy,
            ..RuntimeConfig::default()
        };
        let g = ReactiveGraph::new(config, EventBus::new());
        g.define_state("count", StateDef::new(ValueType::Number, json!(0)))
            .unwrap();
        g.register_invariants(vec![non_negative()]);
        g
    }

    fn record(g: &ReactiveGraph) -> Rc<RefCell<Vec<RuntimeEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let _ = g
            .events()
            .on(EventKind::InvariantViolation, move |e| s.borrow_mut().push(e.clone()));
        seen
    }

    #[test]
    fn report_policy_commits_then_publishes() {
        let g = graph(InvariantPolicy::Report);
        let seen = record(&g);

        g.set("count", json!(-1)).unwrap();
        assert_eq!(g.get("count").unwrap(), json!(-1));
        assert_eq!(
            *seen.borrow(),
            vec![RuntimeEvent::InvariantViolation(InvariantViolation {
                name: "non-negative".into(),
                message: "count must not go below zero".into(),
            })]
        );
    }

    #[test]
    fn rollback_policy_restores_and_fails() {
        let g = graph(InvariantPolicy::Rollback);
        let seen = record(&g);
        let notified = Rc::new(RefCell::new(0));
        let n = notified.clone();
        let _s = g.subscribe("count", move || *n.borrow_mut() += 1);

        g.set("count", json!(3)).unwrap();
        let err = g.set("count", json!(-1)).unwrap_err();
        assert!(matches!(err, RuntimeError::InvariantViolation { .. }));
        assert_eq!(g.get("count").unwrap(), json!(3));
        assert_eq!(*notified.borrow(), 1);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn failing_predicate_counts_as_violation() {
        let g = graph(InvariantPolicy::Report);
        g.register_invariants(vec![InvariantDef {
            name: "broken".into(),
            expr: Expr::parse(&json!({"ref": "ghost"})).unwrap(),
            message: None,
        }]);
        let violations = g.check_invariants();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "broken");
        assert!(violations[0].message.contains("ghost"));
    }
}

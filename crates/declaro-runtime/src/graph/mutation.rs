//! Mutation operations applied to a state node's current value.

use serde_json::Value;

use declaro_core::{Expr, MutationDef, MutationKind};

use crate::error::RuntimeError;
use crate::resolver::{self, is_truthy, normalize, Bindings, Scope};

/// A resolved mutation. Value-carrying kinds hold the already-resolved
/// operand; `filter` and `map` hold the per-item expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set(Value),
    Add(Value),
    Subtract(Value),
    Multiply(Value),
    Toggle,
    Push(Value),
    Pop,
    Merge(Value),
    Filter(Expr),
    Map(Expr),
}

impl Mutation {
    /// Builds a mutation from its definition, resolving the value
    /// expression against `scope` (the per-item expression of `filter` and
    /// `map` is kept unresolved).
    pub fn from_def(def: &MutationDef, scope: &dyn Scope) -> Result<Self, RuntimeError> {
        def.validate()?;
        let expr = || {
            def.value.clone().ok_or_else(|| RuntimeError::InvalidDefinition {
                reason: format!("mutation '{}' on '{}' needs a value", def.op, def.target),
            })
        };
        let value = || resolver::resolve(&expr()?, scope);

        Ok(match def.op {
            MutationKind::Set => Mutation::Set(value()?),
            MutationKind::Add => Mutation::Add(value()?),
            MutationKind::Subtract => Mutation::Subtract(value()?),
            MutationKind::Multiply => Mutation::Multiply(value()?),
            MutationKind::Toggle => Mutation::Toggle,
            MutationKind::Push => Mutation::Push(value()?),
            MutationKind::Pop => Mutation::Pop,
            MutationKind::Merge => Mutation::Merge(value()?),
            MutationKind::Filter => Mutation::Filter(expr()?),
            MutationKind::Map => Mutation::Map(expr()?),
        })
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Set(_) => MutationKind::Set,
            Mutation::Add(_) => MutationKind::Add,
            Mutation::Subtract(_) => MutationKind::Subtract,
            Mutation::Multiply(_) => MutationKind::Multiply,
            Mutation::Toggle => MutationKind::Toggle,
            Mutation::Push(_) => MutationKind::Push,
            Mutation::Pop => MutationKind::Pop,
            Mutation::Merge(_) => MutationKind::Merge,
            Mutation::Filter(_) => MutationKind::Filter,
            Mutation::Map(_) => MutationKind::Map,
        }
    }

    /// Computes the next value of state `id` from `current`. `scope` backs
    /// the per-item expressions, layered under `item` and `index`.
    pub fn apply(&self, id: &str, current: &Value, scope: &dyn Scope) -> Result<Value, RuntimeError> {
        match self {
            Mutation::Set(value) => Ok(value.clone()),

            Mutation::Add(operand) | Mutation::Subtract(operand) | Mutation::Multiply(operand) => {
                let lhs = current
                    .as_f64()
                    .ok_or_else(|| RuntimeError::type_mismatch(id, "number", current))?;
                let rhs = operand
                    .as_f64()
                    .ok_or_else(|| RuntimeError::type_mismatch(id, "number", operand))?;
                normalize(match self {
                    Mutation::Add(_) => lhs + rhs,
                    Mutation::Subtract(_) => lhs - rhs,
                    _ => lhs * rhs,
                })
            }

            Mutation::Toggle => match current {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(RuntimeError::type_mismatch(id, "boolean", other)),
            },

            Mutation::Push(item) => {
                let mut items = array(id, current)?;
                items.push(item.clone());
                Ok(Value::Array(items))
            }
            Mutation::Pop => {
                let mut items = array(id, current)?;
                items.pop();
                Ok(Value::Array(items))
            }

            Mutation::Merge(incoming) => {
                let (Value::Object(base), Value::Object(fields)) = (current, incoming) else {
                    let offending = if current.is_object() { incoming } else { current };
                    return Err(RuntimeError::type_mismatch(id, "object", offending));
                };
                let mut merged = base.clone();
                for (key, value) in fields {
                    merged.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(merged))
            }

            Mutation::Filter(predicate) => {
                let items = array(id, current)?;
                let mut kept = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let keep = per_item(predicate, &item, index, scope)?;
                    if is_truthy(&keep) {
                        kept.push(item);
                    }
                }
                Ok(Value::Array(kept))
            }
            Mutation::Map(transform) => {
                let items = array(id, current)?;
                items
                    .into_iter()
                    .enumerate()
                    .map(|(index, item)| per_item(transform, &item, index, scope))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
        }
    }
}

fn array(id: &str, current: &Value) -> Result<Vec<Value>, RuntimeError> {
    match current {
        Value::Array(items) => Ok(items.clone()),
        other => Err(RuntimeError::type_mismatch(id, "array", other)),
    }
}

fn per_item(expr: &Expr, item: &Value, index: usize, scope: &dyn Scope) -> Result<Value, RuntimeError> {
    let bindings = Bindings::new(scope)
        .with("item", item.clone())
        .with("index", Value::from(index));
    resolver::resolve(expr, &bindings)
}

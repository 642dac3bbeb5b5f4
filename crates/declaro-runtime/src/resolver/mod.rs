//! Expression resolver: a pure evaluator for [`Expr`] trees.
//!
//! [`resolve`] is total over the expression grammar. It reads identifiers
//! through a [`Scope`] and never writes, so it is safe to call from computed
//! reads, effect runs and mutation value evaluation alike.
//!
//! Failures propagate to the caller:
//! - a root identifier no scope defines → [`RuntimeError::UnresolvedReference`]
//! - an operator applied to the wrong arity or operand types, or division by
//!   zero → [`RuntimeError::InvalidExpression`]

pub mod ops;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use declaro_core::{Expr, Op, RefPath};

use crate::error::RuntimeError;

pub use ops::{is_truthy, normalize, values_equal};

/// A read-only source of identifier values.
pub trait Scope {
    /// Looks up a root identifier. `Ok(None)` means the scope does not
    /// define it.
    fn lookup(&self, name: &str) -> Result<Option<Value>, RuntimeError>;
}

impl Scope for Map<String, Value> {
    fn lookup(&self, name: &str) -> Result<Option<Value>, RuntimeError> {
        Ok(self.get(name).cloned())
    }
}

impl Scope for IndexMap<String, Value> {
    fn lookup(&self, name: &str) -> Result<Option<Value>, RuntimeError> {
        Ok(self.get(name).cloned())
    }
}

/// A scope with no identifiers.
pub struct EmptyScope;

impl Scope for EmptyScope {
    fn lookup(&self, _name: &str) -> Result<Option<Value>, RuntimeError> {
        Ok(None)
    }
}

/// Local bindings (action parameters, `item`/`index`) layered over a parent
/// scope. Inner bindings shadow outer ones.
pub struct Bindings<'a> {
    vars: IndexMap<String, Value>,
    parent: &'a dyn Scope,
}

impl<'a> Bindings<'a> {
    pub fn new(parent: &'a dyn Scope) -> Self {
        Bindings {
            vars: IndexMap::new(),
            parent,
        }
    }

    /// Binds `names` positionally to `args`. Missing arguments bind to
    /// `null`; extra arguments are ignored.
    pub fn positional(parent: &'a dyn Scope, names: &[String], args: &[Value]) -> Self {
        let mut bindings = Bindings::new(parent);
        for (i, name) in names.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or(Value::Null);
            bindings.vars.insert(name.clone(), value);
        }
        bindings
    }

    pub fn with(mut self, name: &str, value: Value) -> Self {
        self.vars.insert(name.to_string(), value);
        self
    }
}

impl Scope for Bindings<'_> {
    fn lookup(&self, name: &str) -> Result<Option<Value>, RuntimeError> {
        match self.vars.get(name) {
            Some(value) => Ok(Some(value.clone())),
            None => self.parent.lookup(name),
        }
    }
}

/// Evaluates `expr` against `scope`.
pub fn resolve(expr: &Expr, scope: &dyn Scope) -> Result<Value, RuntimeError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| resolve(item, scope))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Object(fields) => {
            let mut out = Map::with_capacity(fields.len());
            for (key, field) in fields {
                out.insert(key.clone(), resolve(field, scope)?);
            }
            Ok(Value::Object(out))
        }
        Expr::Ref(path) => resolve_ref(path, scope),
        Expr::Call { op, args } => resolve_call(*op, args, scope),
    }
}

fn resolve_ref(path: &RefPath, scope: &dyn Scope) -> Result<Value, RuntimeError> {
    let root = scope
        .lookup(&path.root)?
        .ok_or_else(|| RuntimeError::UnresolvedReference {
            id: path.root.clone(),
        })?;
    Ok(walk_path(root, &path.path))
}

/// Follows object keys and array positions. A segment that does not exist
/// yields `null`.
fn walk_path(mut value: Value, path: &[String]) -> Value {
    for segment in path {
        value = match value {
            Value::Object(mut map) => map.remove(segment).unwrap_or(Value::Null),
            Value::Array(mut items) => match segment.parse::<usize>() {
                Ok(i) if i < items.len() => items.swap_remove(i),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
    }
    value
}

fn resolve_call(op: Op, args: &[Expr], scope: &dyn Scope) -> Result<Value, RuntimeError> {
    let arity = op.arity();
    if !arity.accepts(args.len()) {
        return Err(RuntimeError::InvalidExpression {
            reason: format!(
                "operator '{}' expects {} argument(s), got {}",
                op,
                arity,
                args.len()
            ),
        });
    }

    // Short-circuiting operators evaluate their arguments lazily.
    match op {
        Op::And => {
            let mut last = Value::Bool(true);
            for arg in args {
                last = resolve(arg, scope)?;
                if !is_truthy(&last) {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Op::Or => {
            let mut last = Value::Bool(false);
            for arg in args {
                last = resolve(arg, scope)?;
                if is_truthy(&last) {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        Op::If => {
            let cond = resolve(&args[0], scope)?;
            if is_truthy(&cond) {
                resolve(&args[1], scope)
            } else {
                resolve(&args[2], scope)
            }
        }
        Op::Coalesce => {
            for arg in args {
                let value = resolve(arg, scope)?;
                if !value.is_null() {
                    return Ok(value);
                }
            }
            Ok(Value::Null)
        }
        _ => {
            let values = args
                .iter()
                .map(|arg| resolve(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            ops::apply(op, &values)
        }
    }
}

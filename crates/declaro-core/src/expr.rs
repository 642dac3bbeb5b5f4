//! Declarative expression AST and its JSON grammar.
//!
//! Expressions appear in computed definitions, mutation values, effect
//! bodies and invariants. They are parsed from JSON once, at definition load,
//! and evaluated by the runtime's resolver against a read-only scope.
//!
//! # Grammar
//!
//! | JSON shape                           | Expression                       |
//! |--------------------------------------|----------------------------------|
//! | `null`, bool, number, string         | [`Expr::Literal`]                |
//! | array                                | [`Expr::Array`] of expressions   |
//! | `{"ref": "user.name"}`               | [`Expr::Ref`]                    |
//! | `{"op": "add", "args": [..]}`        | [`Expr::Call`]                   |
//! | `{"literal": <any>}`                 | [`Expr::Literal`], verbatim      |
//! | any other object                     | [`Expr::Object`] of expressions  |
//!
//! Operator names are resolved to [`Op`] at parse time. Arity is checked by
//! the resolver at evaluation time.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Object(IndexMap<String, Expr>),
    Ref(RefPath),
    Call { op: Op, args: Vec<Expr> },
}

/// A dotted identifier reference: `root.seg1.seg2`.
///
/// The root names a parameter, state or computed identifier. Remaining
/// segments index objects by key and arrays by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPath {
    pub root: String,
    pub path: Vec<String>,
}

impl RefPath {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let mut segments = raw.split('.');
        let root = segments.next().unwrap_or_default();
        if root.is_empty() {
            return Err(CoreError::InvalidExpression {
                reason: format!("empty reference '{}'", raw),
            });
        }
        let path: Vec<String> = segments.map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(CoreError::InvalidExpression {
                reason: format!("empty path segment in reference '{}'", raw),
            });
        }
        Ok(RefPath {
            root: root.to_string(),
            path,
        })
    }
}

impl fmt::Display for RefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

/// Number of arguments an operator accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == *k,
            Arity::AtLeast(k) => n >= *k,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(k) => write!(f, "exactly {}", k),
            Arity::AtLeast(k) => write!(f, "at least {}", k),
        }
    }
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// The closed operator vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Min,
    Max,
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logic
    And,
    Or,
    Not,
    If,
    Coalesce,
    // Strings and collections
    Concat,
    Len,
    Get,
    Includes,
    Keys,
    // Conversions
    Str,
    Num,
}

impl Op {
    pub const ALL: [Op; 26] = [
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::Mod,
        Op::Neg,
        Op::Min,
        Op::Max,
        Op::Eq,
        Op::Ne,
        Op::Lt,
        Op::Le,
        Op::Gt,
        Op::Ge,
        Op::And,
        Op::Or,
        Op::Not,
        Op::If,
        Op::Coalesce,
        Op::Concat,
        Op::Len,
        Op::Get,
        Op::Includes,
        Op::Keys,
        Op::Str,
        Op::Num,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Mod => "mod",
            Op::Neg => "neg",
            Op::Min => "min",
            Op::Max => "max",
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::Lt => "lt",
            Op::Le => "le",
            Op::Gt => "gt",
            Op::Ge => "ge",
            Op::And => "and",
            Op::Or => "or",
            Op::Not => "not",
            Op::If => "if",
            Op::Coalesce => "coalesce",
            Op::Concat => "concat",
            Op::Len => "len",
            Op::Get => "get",
            Op::Includes => "includes",
            Op::Keys => "keys",
            Op::Str => "str",
            Op::Num => "num",
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Eq
            | Op::Ne
            | Op::Lt
            | Op::Le
            | Op::Gt
            | Op::Ge
            | Op::Get
            | Op::Includes => Arity::Exact(2),
            Op::Neg | Op::Not | Op::Len | Op::Keys | Op::Str | Op::Num => Arity::Exact(1),
            Op::If => Arity::Exact(3),
            Op::And | Op::Or | Op::Coalesce | Op::Min | Op::Max => Arity::AtLeast(1),
            Op::Concat => Arity::AtLeast(0),
        }
    }
}

impl FromStr for Op {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Op::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| CoreError::InvalidExpression {
                reason: format!("unknown operator '{}'", s),
            })
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// JSON conversion
// ---------------------------------------------------------------------------

impl Expr {
    /// Parses an expression from its JSON form.
    pub fn parse(value: &Value) -> Result<Expr, CoreError> {
        match value {
            Value::Array(items) => Ok(Expr::Array(
                items.iter().map(Expr::parse).collect::<Result<_, _>>()?,
            )),
            Value::Object(map) => {
                if let Some(literal) = map.get("literal") {
                    expect_only_keys(map, &["literal"])?;
                    return Ok(Expr::Literal(literal.clone()));
                }
                if let Some(raw) = map.get("ref") {
                    expect_only_keys(map, &["ref"])?;
                    let raw = raw.as_str().ok_or_else(|| CoreError::InvalidExpression {
                        reason: "'ref' must be a string".into(),
                    })?;
                    return Ok(Expr::Ref(RefPath::parse(raw)?));
                }
                if let Some(name) = map.get("op") {
                    expect_only_keys(map, &["op", "args"])?;
                    let name = name.as_str().ok_or_else(|| CoreError::InvalidExpression {
                        reason: "'op' must be a string".into(),
                    })?;
                    let op: Op = name.parse()?;
                    let args = match map.get("args") {
                        None => Vec::new(),
                        Some(Value::Array(items)) => {
                            items.iter().map(Expr::parse).collect::<Result<_, _>>()?
                        }
                        Some(_) => {
                            return Err(CoreError::InvalidExpression {
                                reason: format!("'args' of '{}' must be an array", name),
                            })
                        }
                    };
                    return Ok(Expr::Call { op, args });
                }
                let mut fields = IndexMap::with_capacity(map.len());
                for (key, item) in map {
                    fields.insert(key.clone(), Expr::parse(item)?);
                }
                Ok(Expr::Object(fields))
            }
            scalar => Ok(Expr::Literal(scalar.clone())),
        }
    }

    /// Shorthand for a reference expression.
    pub fn reference(raw: &str) -> Result<Expr, CoreError> {
        Ok(Expr::Ref(RefPath::parse(raw)?))
    }

    /// Returns the JSON form of this expression.
    pub fn to_json(&self) -> Value {
        match self {
            Expr::Literal(value) => match value {
                Value::Array(_) | Value::Object(_) => {
                    serde_json::json!({ "literal": value })
                }
                scalar => scalar.clone(),
            },
            Expr::Array(items) => Value::Array(items.iter().map(Expr::to_json).collect()),
            Expr::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Expr::Ref(path) => serde_json::json!({ "ref": path.to_string() }),
            Expr::Call { op, args } => serde_json::json!({
                "op": op.name(),
                "args": args.iter().map(Expr::to_json).collect::<Vec<_>>(),
            }),
        }
    }

    /// Collects the root identifiers referenced anywhere in this expression.
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Array(items) => items.iter().for_each(|e| e.collect_references(out)),
            Expr::Object(fields) => fields.values().for_each(|e| e.collect_references(out)),
            Expr::Ref(path) => {
                if !out.contains(&path.root.as_str()) {
                    out.push(&path.root);
                }
            }
            Expr::Call { args, .. } => args.iter().for_each(|e| e.collect_references(out)),
        }
    }
}

fn expect_only_keys(
    map: &serde_json::Map<String, Value>,
    allowed: &[&str],
) -> Result<(), CoreError> {
    match map.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(extra) => Err(CoreError::InvalidExpression {
            reason: format!(
                "unexpected key '{}' alongside '{}'; wrap object values in {{\"literal\": ..}}",
                extra, allowed[0]
            ),
        }),
        None => Ok(()),
    }
}

impl TryFrom<Value> for Expr {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Expr::parse(&value)
    }
}

impl From<Expr> for Value {
    fn from(expr: Expr) -> Self {
        expr.to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_scalars_as_literals() {
        assert_eq!(Expr::parse(&json!(3)).unwrap(), Expr::Literal(json!(3)));
        assert_eq!(Expr::parse(&json!("hi")).unwrap(), Expr::Literal(json!("hi")));
        assert_eq!(Expr::parse(&json!(null)).unwrap(), Expr::Literal(json!(null)));
    }

    #[test]
    fn parses_dotted_reference() {
        let expr = Expr::parse(&json!({"ref": "user.address.0"})).unwrap();
        match expr {
            Expr::Ref(path) => {
                assert_eq!(path.root, "user");
                assert_eq!(path.path, vec!["address".to_string(), "0".to_string()]);
                assert_eq!(path.to_string(), "user.address.0");
            }
            other => panic!("expected Ref, got {:?}", other),
        }
    }

    #[test]
    fn parses_nested_call() {
        let expr = Expr::parse(&json!({
            "op": "add",
            "args": [{"ref": "count"}, {"op": "mul", "args": [2, 3]}]
        }))
        .unwrap();
        match expr {
            Expr::Call { op, args } => {
                assert_eq!(op, Op::Add);
                assert_eq!(args.len(), 2);
                assert!(matches!(args[1], Expr::Call { op: Op::Mul, .. }));
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn unknown_operator_is_invalid_expression() {
        let err = Expr::parse(&json!({"op": "pow", "args": [2, 3]})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidExpression { .. }));
        assert!(err.to_string().contains("pow"));
    }

    #[test]
    fn plain_objects_are_object_literals() {
        let expr = Expr::parse(&json!({"name": {"ref": "first"}, "age": 3})).unwrap();
        match expr {
            Expr::Object(fields) => {
                assert!(matches!(fields["name"], Expr::Ref(_)));
                assert_eq!(fields["age"], Expr::Literal(json!(3)));
            }
            other => panic!("expected Object, got {:?}", other),
        }
    }

    #[test]
    fn literal_escape_keeps_object_verbatim() {
        let expr = Expr::parse(&json!({"literal": {"ref": "not-a-ref"}})).unwrap();
        assert_eq!(expr, Expr::Literal(json!({"ref": "not-a-ref"})));
    }

    #[test]
    fn ref_with_extra_keys_is_rejected() {
        let err = Expr::parse(&json!({"ref": "a", "other": 1})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidExpression { .. }));
    }

    #[test]
    fn json_form_reparses_to_same_expression() {
        let source = json!({
            "op": "if",
            "args": [{"ref": "flag"}, [1, 2], {"literal": {"op": "x"}}]
        });
        let expr = Expr::parse(&source).unwrap();
        assert_eq!(Expr::parse(&expr.to_json()).unwrap(), expr);
    }

    #[test]
    fn collects_root_references_once() {
        let expr = Expr::parse(&json!({
            "op": "add",
            "args": [{"ref": "a.x"}, {"ref": "b"}, {"ref": "a.y"}]
        }))
        .unwrap();
        assert_eq!(expr.references(), vec!["a", "b"]);
    }

    #[test]
    fn arity_accepts() {
        assert!(Op::If.arity().accepts(3));
        assert!(!Op::Not.arity().accepts(2));
        assert!(Op::Concat.arity().accepts(0));
        assert!(Op::And.arity().accepts(4));
        assert!(!Op::Coalesce.arity().accepts(0));
    }

    #[test]
    fn every_operator_name_round_trips() {
        for op in Op::ALL {
            assert_eq!(op.name().parse::<Op>().unwrap(), op);
        }
    }

    #[test]
    fn deserializes_through_serde() {
        let expr: Expr = serde_json::from_value(json!({"op": "not", "args": [true]})).unwrap();
        assert!(matches!(expr, Expr::Call { op: Op::Not, .. }));
    }
}

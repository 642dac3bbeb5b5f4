//! Per-operator evaluation for eagerly-evaluated operators, plus the value
//! helpers shared with the reactive graph (equality, truthiness, number
//! normalization).

use serde_json::{Number, Value};

use declaro_core::{type_name_of, Op};

use crate::error::RuntimeError;

/// Largest integer exactly representable in an `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Converts an `f64` result into a JSON number, collapsing integral values
/// to integers so that `1` and `1.0` compare equal everywhere.
pub fn normalize(n: f64) -> Result<Value, RuntimeError> {
    if !n.is_finite() {
        return Err(RuntimeError::InvalidExpression {
            reason: format!("non-finite numeric result {}", n),
        });
    }
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| RuntimeError::InvalidExpression {
            reason: format!("unrepresentable number {}", n),
        })
}

/// Structural equality with numeric comparison by value.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Integers compare exactly; a float on either side compares as `f64`.
fn numbers_equal(x: &Number, y: &Number) -> bool {
    match (as_integer(x), as_integer(y)) {
        (Some(x), Some(y)) => x == y,
        _ => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
    }
}

fn as_integer(n: &Number) -> Option<i128> {
    n.as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from))
}

/// `null`, `false`, `0` and `""` are falsy; everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The string form used by `concat` and `str`.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn invalid(op: Op, reason: impl Into<String>) -> RuntimeError {
    RuntimeError::InvalidExpression {
        reason: format!("{}: {}", op, reason.into()),
    }
}

fn number(op: Op, value: &Value) -> Result<f64, RuntimeError> {
    value
        .as_f64()
        .ok_or_else(|| invalid(op, format!("expected number, got {}", type_name_of(value))))
}

/// Applies an eagerly-evaluated operator to its resolved arguments. Arity
/// has already been checked by the caller.
pub fn apply(op: Op, args: &[Value]) -> Result<Value, RuntimeError> {
    match op {
        Op::Add => {
            if args[0].is_string() || args[1].is_string() {
                return Ok(Value::String(display(&args[0]) + &display(&args[1])));
            }
            normalize(number(op, &args[0])? + number(op, &args[1])?)
        }
        Op::Sub => normalize(number(op, &args[0])? - number(op, &args[1])?),
        Op::Mul => normalize(number(op, &args[0])? * number(op, &args[1])?),
        Op::Div | Op::Mod => {
            let lhs = number(op, &args[0])?;
            let rhs = number(op, &args[1])?;
            if rhs == 0.0 {
                return Err(invalid(op, "division by zero"));
            }
            normalize(if op == Op::Div { lhs / rhs } else { lhs % rhs })
        }
        Op::Neg => normalize(-number(op, &args[0])?),
        Op::Min | Op::Max => {
            let mut best = number(op, &args[0])?;
            for arg in &args[1..] {
                let n = number(op, arg)?;
                best = if op == Op::Min { best.min(n) } else { best.max(n) };
            }
            normalize(best)
        }

        Op::Eq => Ok(Value::Bool(values_equal(&args[0], &args[1]))),
        Op::Ne => Ok(Value::Bool(!values_equal(&args[0], &args[1]))),
        Op::Lt | Op::Le | Op::Gt | Op::Ge => compare(op, &args[0], &args[1]),

        Op::Not => Ok(Value::Bool(!is_truthy(&args[0]))),

        Op::Concat => Ok(Value::String(args.iter().map(display).collect())),
        Op::Len => match &args[0] {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(invalid(op, format!("no length for {}", type_name_of(other)))),
        },
        Op::Get => match (&args[0], &args[1]) {
            (Value::Null, _) => Ok(Value::Null),
            (Value::Object(map), Value::String(key)) => {
                Ok(map.get(key).cloned().unwrap_or(Value::Null))
            }
            (Value::Array(items), index) => {
                let i = number(op, index)?;
                if i < 0.0 || i.fract() != 0.0 {
                    return Ok(Value::Null);
                }
                Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
            }
            (container, key) => Err(invalid(
                op,
                format!(
                    "cannot index {} with {}",
                    type_name_of(container),
                    type_name_of(key)
                ),
            )),
        },
        Op::Includes => match (&args[0], &args[1]) {
            (Value::Array(items), needle) => {
                Ok(Value::Bool(items.iter().any(|item| values_equal(item, needle))))
            }
            (Value::String(haystack), Value::String(needle)) => {
                Ok(Value::Bool(haystack.contains(needle.as_str())))
            }
            (container, _) => Err(invalid(
                op,
                format!("cannot search {}", type_name_of(container)),
            )),
        },
        Op::Keys => match &args[0] {
            Value::Object(map) => Ok(Value::Array(
                map.keys().cloned().map(Value::String).collect(),
            )),
            other => Err(invalid(op, format!("no keys for {}", type_name_of(other)))),
        },

        Op::Str => Ok(Value::String(display(&args[0]))),
        Op::Num => match &args[0] {
            Value::Number(_) => Ok(args[0].clone()),
            Value::Bool(b) => Ok(Value::from(u8::from(*b))),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(n) => normalize(n),
                Err(_) => Err(invalid(op, format!("'{}' is not a number", s))),
            },
            other => Err(invalid(op, format!("cannot convert {}", type_name_of(other)))),
        },

        Op::And | Op::Or | Op::If | Op::Coalesce => Err(RuntimeError::InvalidExpression {
            reason: format!("operator '{}' must be evaluated lazily", op),
        }),
    }
}

fn compare(op: Op, lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    let ordering = match (lhs, rhs) {
        (Value::Number(_), Value::Number(_)) => number(op, lhs)?.partial_cmp(&number(op, rhs)?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let ordering = ordering.ok_or_else(|| {
        invalid(
            op,
            format!(
                "cannot compare {} with {}",
                type_name_of(lhs),
                type_name_of(rhs)
            ),
        )
    })?;
    let result = match op {
        Op::Lt => ordering.is_lt(),
        Op::Le => ordering.is_le(),
        Op::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integral_floats_normalize_to_integers() {
        assert_eq!(normalize(4.0).unwrap(), json!(4));
        assert_eq!(normalize(2.5).unwrap(), json!(2.5));
        assert!(normalize(f64::NAN).is_err());
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(values_equal(&json!([1, {"a": 2.0}]), &json!([1.0, {"a": 2}])));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!values_equal(&json!("1"), &json!(1)));
    }

    #[test]
    fn large_integers_compare_exactly() {
        assert!(!values_equal(&json!(9007199254740992i64), &json!(9007199254740993i64)));
        assert!(!values_equal(&json!(u64::MAX), &json!(u64::MAX - 1)));
        assert!(values_equal(&json!(u64::MAX), &json!(u64::MAX)));
        assert!(!values_equal(&json!(-1), &json!(u64::MAX)));
        assert!(values_equal(&json!(9007199254740992i64), &json!(9007199254740992.0)));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(apply(Op::Add, &[json!(2), json!(3)]).unwrap(), json!(5));
        assert_eq!(apply(Op::Sub, &[json!(2), json!(3)]).unwrap(), json!(-1));
        assert_eq!(apply(Op::Mul, &[json!(1.5), json!(2)]).unwrap(), json!(3));
        assert_eq!(apply(Op::Div, &[json!(7), json!(2)]).unwrap(), json!(3.5));
        assert_eq!(apply(Op::Mod, &[json!(7), json!(2)]).unwrap(), json!(1));
        assert_eq!(apply(Op::Max, &[json!(1), json!(9), json!(4)]).unwrap(), json!(9));
    }

    #[test]
    fn add_concatenates_strings() {
        assert_eq!(apply(Op::Add, &[json!("n="), json!(2)]).unwrap(), json!("n=2"));
    }

    #[test]
    fn division_by_zero_is_invalid() {
        let err = apply(Op::Div, &[json!(1), json!(0)]).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidExpression { .. }));
    }

    #[test]
    fn arithmetic_on_non_numbers_is_invalid() {
        assert!(apply(Op::Sub, &[json!("a"), json!(1)]).is_err());
        assert!(apply(Op::Neg, &[json!(null)]).is_err());
    }

    #[test]
    fn comparisons() {
        assert_eq!(apply(Op::Lt, &[json!(1), json!(2)]).unwrap(), json!(true));
        assert_eq!(apply(Op::Ge, &[json!("b"), json!("a")]).unwrap(), json!(true));
        assert!(apply(Op::Lt, &[json!(1), json!("2")]).is_err());
    }

    #[test]
    fn collections() {
        assert_eq!(apply(Op::Len, &[json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(apply(Op::Len, &[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(apply(Op::Get, &[json!({"a": 1}), json!("a")]).unwrap(), json!(1));
        assert_eq!(apply(Op::Get, &[json!([5, 6]), json!(1)]).unwrap(), json!(6));
        assert_eq!(apply(Op::Get, &[json!(null), json!("x")]).unwrap(), json!(null));
        assert_eq!(apply(Op::Includes, &[json!([1, 2]), json!(2.0)]).unwrap(), json!(true));
        assert_eq!(apply(Op::Includes, &[json!("abc"), json!("bc")]).unwrap(), json!(true));
        assert_eq!(apply(Op::Keys, &[json!({"x": 1, "y": 2})]).unwrap(), json!(["x", "y"]));
    }

    #[test]
    fn conversions() {
        assert_eq!(apply(Op::Str, &[json!(12)]).unwrap(), json!("12"));
        assert_eq!(apply(Op::Num, &[json!(" 12.0 ")]).unwrap(), json!(12));
        assert_eq!(apply(Op::Num, &[json!(true)]).unwrap(), json!(1));
        assert!(apply(Op::Num, &[json!("twelve")]).is_err());
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!(-1)));
    }
}

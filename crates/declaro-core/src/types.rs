//! Declared value types for state nodes.
//!
//! Runtime values are plain [`serde_json::Value`]s. A state node declares one
//! of the five structural types below; any other declared name parses as
//! [`ValueType::Any`], which every value satisfies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The declared type of a state node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// Unrecognized or absent type declaration. Accepts every value.
    #[default]
    #[serde(other)]
    Any,
}

impl ValueType {
    /// Returns true if `value` has the runtime shape this type describes.
    ///
    /// Strings, numbers and booleans match by exact runtime type, arrays by
    /// sequence-ness and objects by non-sequence key/value-ness.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
            ValueType::Any => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Any => "any",
        }
    }
}

/// Returns the structural type name of a runtime value.
pub fn type_name_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_by_runtime_shape() {
        assert!(ValueType::Number.matches(&json!(7)));
        assert!(ValueType::Number.matches(&json!(7.5)));
        assert!(!ValueType::Number.matches(&json!("7")));
        assert!(ValueType::Array.matches(&json!([])));
        assert!(!ValueType::Object.matches(&json!([1, 2])));
        assert!(ValueType::Object.matches(&json!({"a": 1})));
        assert!(!ValueType::Boolean.matches(&json!(null)));
    }

    #[test]
    fn unknown_type_names_parse_as_any() {
        let ty: ValueType = serde_json::from_value(json!("date")).unwrap();
        assert_eq!(ty, ValueType::Any);
        assert!(ty.matches(&json!(null)));
        assert!(ty.matches(&json!({"nested": [1]})));
    }

    #[test]
    fn type_names() {
        assert_eq!(type_name_of(&json!(null)), "null");
        assert_eq!(type_name_of(&json!([1])), "array");
        assert_eq!(ValueType::Boolean.name(), "boolean");
    }
}

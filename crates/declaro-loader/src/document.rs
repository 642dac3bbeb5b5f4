//! Module document parsing.
//!
//! A module document is a JSON object carrying the format marker
//! (`"declaro": "module/1"`), an optional `components` map and an optional
//! `update` (a partial program definition). The content hash is the blake3
//! digest of the source text.

use indexmap::IndexMap;
use serde_json::Value;

use declaro_core::{ModuleDocument, ProgramUpdate, MODULE_FORMAT_MARKER, MODULE_FORMAT_VERSION};

use crate::error::LoadError;

/// Hex blake3 digest of `text`.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Parses the document fetched from `key`.
pub fn parse_document(key: &str, text: &str) -> Result<ModuleDocument, LoadError> {
    let parse_error = |reason: String| LoadError::ParseError {
        key: key.to_string(),
        reason,
    };
    let invalid = |reason: String| LoadError::InvalidDocument {
        key: key.to_string(),
        reason,
    };

    let value: Value = serde_json::from_str(text).map_err(|e| parse_error(e.to_string()))?;
    let Value::Object(mut fields) = value else {
        return Err(invalid("document is not a JSON object".to_string()));
    };

    match fields.remove(MODULE_FORMAT_MARKER) {
        Some(Value::String(version)) if version == MODULE_FORMAT_VERSION => {}
        Some(other) => {
            return Err(invalid(format!(
                "unsupported format marker {} (expected \"{}\")",
                other, MODULE_FORMAT_VERSION
            )))
        }
        None => {
            return Err(invalid(format!(
                "missing \"{}\" format marker",
                MODULE_FORMAT_MARKER
            )))
        }
    }

    let components: IndexMap<String, Value> = match fields.remove("components") {
        None | Some(Value::Null) => IndexMap::new(),
        Some(raw) => serde_json::from_value(raw).map_err(|e| parse_error(format!("components: {}", e)))?,
    };

    let update = match fields.remove("update") {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let update: ProgramUpdate =
                serde_json::from_value(raw).map_err(|e| parse_error(format!("update: {}", e)))?;
            update
                .validate()
                .map_err(|e| parse_error(format!("update: {}", e)))?;
            Some(update)
        }
    };

    Ok(ModuleDocument {
        key: key.to_string(),
        hash: content_hash(text),
        components,
        update,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_components_and_update() {
        let text = r#"{
            "declaro": "module/1",
            "components": { "Badge": { "tag": "span" } },
            "update": { "state": { "n": { "type": "number", "initial": 1 } } }
        }"#;
        let doc = parse_document("/m.json", text).unwrap();
        assert_eq!(doc.key, "/m.json");
        assert_eq!(doc.component("Badge"), Some(&serde_json::json!({"tag": "span"})));
        assert!(doc.update.is_some());
        assert_eq!(doc.hash, content_hash(text));
        assert_eq!(doc.hash.len(), 64);
    }

    #[test]
    fn missing_marker_is_invalid_document() {
        let err = parse_document("k", r#"{"components": {}}"#).unwrap_err();
        assert!(matches!(err, LoadError::InvalidDocument { .. }));
        let err = parse_document("k", r#"{"declaro": "module/9"}"#).unwrap_err();
        assert!(matches!(err, LoadError::InvalidDocument { .. }));
        let err = parse_document("k", "[1, 2]").unwrap_err();
        assert!(matches!(err, LoadError::InvalidDocument { .. }));
    }

    #[test]
    fn malformed_content_is_parse_error() {
        let err = parse_document("k", "{ not json").unwrap_err();
        assert!(matches!(err, LoadError::ParseError { .. }));
        assert!(!err.is_retryable());

        let bad_update = r#"{
            "declaro": "module/1",
            "update": { "actions": { "a": { "mutations": [ { "target": "x", "op": "toggle", "value": 1 } ] } } }
        }"#;
        assert!(matches!(
            parse_document("k", bad_update),
            Err(LoadError::ParseError { .. })
        ));
    }
}

//! Single-key upsert on a decoded document.

use serde_json::Value;

use crate::codec::ConfigDocument;

/// The key to set and the string it should hold.
///
/// The value is always stored as a JSON string; it is never coerced into a
/// number or boolean, so a stored `1` does not satisfy a request for `"1"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub key: String,
    pub value: String,
}

impl PatchRequest {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Whether applying `request` would change `doc`.
pub fn needs_update(doc: &ConfigDocument, request: &PatchRequest) -> bool {
    !matches!(doc.get(&request.key), Some(Value::String(current)) if *current == request.value)
}

/// Set `doc[key] = value`, inserting the key when absent.
pub fn apply(mut doc: ConfigDocument, request: &PatchRequest) -> ConfigDocument {
    doc.insert(request.key.clone(), Value::String(request.value.clone()));
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> ConfigDocument {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    #[test]
    fn equal_string_needs_no_update() {
        let d = doc(json!({"a": "1"}));
        assert!(!needs_update(&d, &PatchRequest::new("a", "1")));
    }

    #[test]
    fn different_string_needs_update() {
        let d = doc(json!({"a": "1"}));
        assert!(needs_update(&d, &PatchRequest::new("a", "2")));
    }

    #[test]
    fn number_does_not_equal_its_string_form() {
        let d = doc(json!({"a": 1}));
        assert!(needs_update(&d, &PatchRequest::new("a", "1")));
    }

    #[test]
    fn bool_and_null_do_not_equal_their_string_forms() {
        let d = doc(json!({"t": true, "n": null}));
        assert!(needs_update(&d, &PatchRequest::new("t", "true")));
        assert!(needs_update(&d, &PatchRequest::new("n", "null")));
    }

    #[test]
    fn missing_key_needs_update() {
        let d = doc(json!({"a": 1}));
        assert!(needs_update(&d, &PatchRequest::new("b", "2")));
    }

    #[test]
    fn apply_upserts_and_preserves_other_keys() {
        let d = doc(json!({"a": 1, "nested": {"x": [1, {"y": null}]}}));
        let patched = apply(d, &PatchRequest::new("b", "2"));
        assert_eq!(
            Value::Object(patched),
            json!({"a": 1, "b": "2", "nested": {"x": [1, {"y": null}]}})
        );
    }

    #[test]
    fn apply_replaces_non_string_values() {
        let d = doc(json!({"a": {"deep": true}}));
        let patched = apply(d, &PatchRequest::new("a", "flat"));
        assert_eq!(Value::Object(patched), json!({"a": "flat"}));
    }

    #[test]
    fn applied_document_no_longer_needs_update() {
        let request = PatchRequest::new("a", "1");
        let patched = apply(doc(json!({"a": 1})), &request);
        assert!(!needs_update(&patched, &request));
    }
}

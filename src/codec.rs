//! Transport decoding and JSON (de)serialization of the patched document.
//!
//! The store hands out base64 content; commits take plain text.  Documents
//! are serialized with sorted keys at every level, two-space indentation and a
//! trailing newline, so re-serializing an unchanged document is byte-stable
//! regardless of how `serde_json` orders its maps.

use base64::Engine as _;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CodecError;
use crate::forge::RemoteFile;

/// The only transport encoding the store is allowed to hand us.
pub const SUPPORTED_ENCODING: &str = "base64";

/// A decoded JSON object.
pub type ConfigDocument = Map<String, Value>;

/// Decode the transport-encoded content of `file` into raw bytes.
pub fn decode(file: &RemoteFile) -> Result<Vec<u8>, CodecError> {
    if !file.encoding.eq_ignore_ascii_case(SUPPORTED_ENCODING) {
        return Err(CodecError::UnsupportedEncoding(file.encoding.clone()));
    }

    // Providers may line-wrap base64 payloads.
    let compact: Vec<u8> = file
        .content
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let bytes = base64::engine::general_purpose::STANDARD.decode(compact)?;

    if let Some(expected) = &file.content_sha256 {
        let actual = hex::encode(Sha256::digest(&bytes));
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(CodecError::DigestMismatch {
                expected: expected.clone(),
                actual,
            });
        }
    }

    Ok(bytes)
}

/// Parse UTF-8 JSON bytes that must hold a top-level object.
pub fn parse_document(bytes: &[u8]) -> Result<ConfigDocument, CodecError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| CodecError::MalformedJson(e.to_string()))?;

    match value {
        Value::Object(doc) => Ok(doc),
        other => Err(CodecError::MalformedJson(format!(
            "top-level value is {}, expected an object",
            json_type(&other)
        ))),
    }
}

/// Serialize `doc` deterministically.
///
/// Numbers keep the exact text they were parsed from, so untouched keys are
/// written back unchanged.
pub fn serialize_document(doc: &ConfigDocument) -> String {
    // `{:#}` is serde_json's pretty printer with two-space indentation.
    format!("{:#}\n", Value::Object(sort_object(doc)))
}

fn sort_object(map: &Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(k, v)| (k.clone(), sort_value(v)))
        .collect()
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(sort_object(map)),
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn remote(content: &str, encoding: &str) -> RemoteFile {
        RemoteFile {
            path: "conf/app.json".to_string(),
            content: content.to_string(),
            encoding: encoding.to_string(),
            size: 0,
            sha: None,
            content_sha256: None,
            revision: None,
        }
    }

    fn doc(value: Value) -> ConfigDocument {
        match value {
            Value::Object(map) => map,
            _ => panic!("test document must be an object"),
        }
    }

    // ── decode ──────────────────────────────────────────────────────────

    #[test]
    fn decode_base64() {
        let bytes = decode(&remote("eyJhIjoxfQ==", "base64")).unwrap();
        assert_eq!(bytes, br#"{"a":1}"#);
    }

    #[test]
    fn decode_tolerates_line_wrapping_and_tag_case() {
        let bytes = decode(&remote("eyJhIjox\nfQ==\n", "BASE64")).unwrap();
        assert_eq!(bytes, br#"{"a":1}"#);
    }

    #[test]
    fn decode_rejects_unsupported_encoding() {
        let err = decode(&remote("eyJhIjoxfQ==", "gzip+base64")).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedEncoding(ref e) if e == "gzip+base64"));
    }

    #[test]
    fn decode_rejects_empty_encoding_tag() {
        let err = decode(&remote("eyJhIjoxfQ==", "")).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedEncoding(_)));
    }

    #[test]
    fn decode_rejects_malformed_base64() {
        let err = decode(&remote("not base64!", "base64")).unwrap_err();
        assert!(matches!(err, CodecError::MalformedEncoding(_)));
    }

    #[test]
    fn decode_checks_content_digest() {
        let mut file = remote("eyJhIjoxfQ==", "base64");
        file.content_sha256 =
            Some("015ABD7F5CC57A2DD94B7590F04AD8084273905EE33EC5CEBEAE62276A97F862".to_string());
        assert!(decode(&file).is_ok());

        file.content_sha256 = Some("00".repeat(32));
        let err = decode(&file).unwrap_err();
        assert!(matches!(err, CodecError::DigestMismatch { .. }));
    }

    // ── parse ───────────────────────────────────────────────────────────

    #[test]
    fn parse_object() {
        let parsed = parse_document(br#"{"a": 1, "b": {"c": [1, 2]}}"#).unwrap();
        assert_eq!(parsed.get("a"), Some(&json!(1)));
        assert_eq!(parsed.get("b"), Some(&json!({"c": [1, 2]})));
    }

    #[test]
    fn parse_rejects_non_object() {
        let err = parse_document(b"[1, 2]").unwrap_err();
        match err {
            CodecError::MalformedJson(msg) => assert!(msg.contains("an array")),
            other => panic!("expected MalformedJson, got {other:?}"),
        }
    }

    #[test]
    fn parse_reports_parser_error() {
        let err = parse_document(b"{\"a\": ").unwrap_err();
        match err {
            CodecError::MalformedJson(msg) => assert!(msg.contains("line 1")),
            other => panic!("expected MalformedJson, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_invalid_utf8() {
        let err = parse_document(&[b'{', 0xff, b'}']).unwrap_err();
        assert!(matches!(err, CodecError::MalformedJson(_)));
    }

    // ── serialize ───────────────────────────────────────────────────────

    #[test]
    fn serialize_sorts_keys_at_every_level() {
        let d = doc(json!({"b": {"z": 1, "y": [{"q": 1, "p": 2}]}, "a": "x"}));
        let out = serialize_document(&d);
        assert_eq!(
            out,
            "{\n  \"a\": \"x\",\n  \"b\": {\n    \"y\": [\n      {\n        \"p\": 2,\n        \"q\": 1\n      }\n    ],\n    \"z\": 1\n  }\n}\n"
        );
    }

    #[test]
    fn serialize_empty_object() {
        assert_eq!(serialize_document(&ConfigDocument::new()), "{}\n");
    }

    #[test]
    fn serialize_keeps_number_text_of_untouched_keys() {
        let input = br#"{"id": 123456789012345678901234567890, "f": 1.0715660391465826e-75, "big": 18446744073709551616}"#;
        let d = parse_document(input).unwrap();
        assert_eq!(
            serialize_document(&d),
            "{\n  \"big\": 18446744073709551616,\n  \"f\": 1.0715660391465826e-75,\n  \"id\": 123456789012345678901234567890\n}\n"
        );
    }

    #[test]
    fn serialize_escapes_control_and_keeps_unicode() {
        let d = doc(json!({"s": "h\u{e9}llo \u{1F600}\n\t\u{1}"}));
        assert_eq!(
            serialize_document(&d),
            "{\n  \"s\": \"h\u{e9}llo \u{1F600}\\n\\t\\u0001\"\n}\n"
        );
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            any::<u64>().prop_map(|n| json!(n)),
            any::<f64>()
                .prop_filter("finite", |f| f.is_finite())
                .prop_map(|f| json!(f)),
            "-?[1-9][0-9]{19,40}(\\.[0-9]{1,20})?"
                .prop_map(|text| serde_json::from_str::<Value>(&text).unwrap()),
            any::<String>().prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("\\PC{1,6}", inner, 0..4)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn serialization_is_stable_across_reparse(
            entries in prop::collection::btree_map("\\PC{1,6}", arb_json(), 0..6)
        ) {
            let d: ConfigDocument = entries.into_iter().collect();
            let once = serialize_document(&d);
            let reparsed = parse_document(once.as_bytes()).unwrap();
            let twice = serialize_document(&reparsed);
            prop_assert_eq!(once, twice);
        }
    }
}

//! Large-value externalization for job payloads.
//!
//! Checkpoint payloads routinely carry fields far too large for the
//! control-plane data path (model outputs, transcripts, embedded binaries).
//! [`externalize`] splits such fields out of a payload tree: every string
//! field over a size threshold and every binary embedding is replaced in
//! place by the sentinel [`OBJ_REF_SENTINEL`], while the original
//! `(path, value)` pairs are collected for out-of-band persistence under the
//! job's large-value storage prefix.
//!
//! The walk is structural over the tagged `serde_json::Value` representation:
//! objects and arrays are recursed field-by-field and element-by-element,
//! primitives below threshold pass through unchanged. The function is pure
//! and total for any payload tree.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::schema::{BYTES_KEY, is_binary_like, join_path as join};

/// Sentinel stored in place of an externalized value.
pub const OBJ_REF_SENTINEL: &str = "__weft_obj_ref__";

/// Default size threshold for string externalization, in bytes.
pub const LARGE_VALUE_THRESHOLD: usize = 10 * 1024;

/// A field extracted from a payload tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedValue {
    /// Slash-joined key path from the tree root.
    pub path: String,
    /// The original value.
    pub value: Value,
}

/// The result of externalizing a payload tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Externalized {
    /// The payload with extracted fields replaced by the sentinel.
    pub residual: Value,
    /// Extracted `(path, value)` pairs, in tree-walk order.
    pub extracted: Vec<ExtractedValue>,
}

/// Splits oversized and binary fields out of a payload tree.
///
/// Strings longer than `threshold` bytes and binary embeddings
/// (`{"$bytes": ...}`) are extracted; everything else passes through. Only
/// fields within the tree are extracted — a bare top-level string or binary
/// is returned unchanged, matching the path-addressed storage layout (an
/// extracted value must have a field path to be stored under).
#[must_use]
pub fn externalize(value: &Value, threshold: usize) -> Externalized {
    let mut extracted = Vec::new();
    let residual = walk(value, "", threshold, &mut extracted);
    Externalized {
        residual,
        extracted,
    }
}

fn walk(value: &Value, path: &str, threshold: usize, out: &mut Vec<ExtractedValue>) -> Value {
    // Extraction applies to addressable fields, never the root itself.
    if !path.is_empty() {
        let oversized = matches!(value, Value::String(s) if s.len() > threshold);
        if oversized || is_binary_like(value) {
            out.push(ExtractedValue {
                path: path.to_string(),
                value: value.clone(),
            });
            return Value::String(OBJ_REF_SENTINEL.to_string());
        }
    }

    match value {
        Value::Object(map) => {
            let mut residual = Map::with_capacity(map.len());
            for (key, child) in map {
                residual.insert(key.clone(), walk(child, &join(path, key), threshold, out));
            }
            Value::Object(residual)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, child)| walk(child, &join(path, &index.to_string()), threshold, out))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Reconstructs a payload tree by writing extracted values back over their
/// sentinels.
///
/// Inverse of [`externalize`]: for any tree `t`,
/// `reinline(&externalize(&t, n).residual, &externalize(&t, n).extracted)`
/// is deep-equal to `t`.
#[must_use]
pub fn reinline(residual: &Value, extracted: &[ExtractedValue]) -> Value {
    let mut result = residual.clone();
    for entry in extracted {
        let segments: Vec<&str> = entry.path.split('/').collect();
        set_path(&mut result, &segments, entry.value.clone());
    }
    result
}

fn set_path(target: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match target {
        Value::Object(map) => {
            if rest.is_empty() {
                map.insert((*head).to_string(), value);
            } else if let Some(child) = map.get_mut(*head) {
                set_path(child, rest, value);
            }
        }
        Value::Array(items) => {
            let Ok(index) = head.parse::<usize>() else {
                return;
            };
            if rest.is_empty() {
                if index < items.len() {
                    items[index] = value;
                }
            } else if let Some(child) = items.get_mut(index) {
                set_path(child, rest, value);
            }
        }
        _ => {}
    }
}

/// Encodes an extracted value as raw bytes for blob storage.
///
/// Strings store their UTF-8 bytes, binary embeddings store the decoded
/// bytes, and any other value stores its JSON encoding.
///
/// # Errors
///
/// Returns a serialization error if a binary embedding carries invalid
/// base64 or JSON encoding fails.
pub fn value_to_bytes(value: &Value) -> Result<Bytes> {
    if let Value::String(s) = value {
        return Ok(Bytes::from(s.clone().into_bytes()));
    }
    if let Some(bytes) = binary_bytes(value)? {
        return Ok(bytes);
    }
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| Error::Serialization {
            message: format!("failed to encode extracted value: {e}"),
        })
}

/// Decodes a binary embedding's bytes, or `None` for non-binary values.
///
/// # Errors
///
/// Returns a serialization error if the embedding carries invalid base64.
pub fn binary_bytes(value: &Value) -> Result<Option<Bytes>> {
    if !is_binary_like(value) {
        return Ok(None);
    }
    let Value::Object(map) = value else {
        return Ok(None);
    };
    let Some(Value::String(encoded)) = map.get(BYTES_KEY) else {
        return Ok(None);
    };
    let raw = BASE64.decode(encoded).map_err(|e| Error::Serialization {
        message: format!("invalid base64 in binary payload: {e}"),
    })?;
    Ok(Some(Bytes::from(raw)))
}

/// Encodes raw bytes as a binary payload embedding.
#[must_use]
pub fn bytes_to_value(bytes: &[u8]) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(BYTES_KEY.to_string(), Value::String(BASE64.encode(bytes)));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn oversized_string_field_is_extracted() {
        let payload = json!({"a": "x".repeat(20_000), "b": 5});
        let result = externalize(&payload, 10_000);

        assert_eq!(result.residual, json!({"a": OBJ_REF_SENTINEL, "b": 5}));
        assert_eq!(result.extracted.len(), 1);
        assert_eq!(result.extracted[0].path, "a");
        assert_eq!(result.extracted[0].value, json!("x".repeat(20_000)));
    }

    #[test]
    fn small_fields_pass_through() {
        let payload = json!({"a": "short", "b": 5, "c": null, "d": true});
        let result = externalize(&payload, 10_000);

        assert_eq!(result.residual, payload);
        assert!(result.extracted.is_empty());
    }

    #[test]
    fn binary_embedding_is_extracted_regardless_of_size() {
        let payload = json!({"frame": {"$bytes": "aGVsbG8="}, "n": 1});
        let result = externalize(&payload, 10_000);

        assert_eq!(result.residual, json!({"frame": OBJ_REF_SENTINEL, "n": 1}));
        assert_eq!(result.extracted[0].path, "frame");
    }

    #[test]
    fn nested_paths_are_slash_joined() {
        let payload = json!({"outer": {"inner": ["small", "y".repeat(64)]}});
        let result = externalize(&payload, 32);

        assert_eq!(result.extracted.len(), 1);
        assert_eq!(result.extracted[0].path, "outer/inner/1");
        assert_eq!(
            result.residual,
            json!({"outer": {"inner": ["small", OBJ_REF_SENTINEL]}})
        );
    }

    #[test]
    fn top_level_scalar_is_untouched() {
        let payload = json!("z".repeat(20_000));
        let result = externalize(&payload, 10_000);

        assert_eq!(result.residual, payload);
        assert!(result.extracted.is_empty());
    }

    #[test]
    fn reinline_round_trips() {
        let payload = json!({
            "a": "x".repeat(20_000),
            "b": {"c": {"$bytes": "aGVsbG8="}, "d": [1, 2, "y".repeat(20_000)]},
            "e": 5,
        });
        let result = externalize(&payload, 10_000);
        assert_eq!(result.extracted.len(), 3);

        let rebuilt = reinline(&result.residual, &result.extracted);
        assert_eq!(rebuilt, payload);
    }

    #[test]
    fn value_to_bytes_for_each_kind() {
        assert_eq!(
            value_to_bytes(&json!("hello")).unwrap(),
            Bytes::from_static(b"hello")
        );
        assert_eq!(
            value_to_bytes(&json!({"$bytes": "aGVsbG8="})).unwrap(),
            Bytes::from_static(b"hello")
        );
        assert_eq!(
            value_to_bytes(&json!({"k": 1})).unwrap(),
            Bytes::from_static(b"{\"k\":1}")
        );
    }

    #[test]
    fn invalid_base64_is_a_serialization_error() {
        let err = value_to_bytes(&json!({"$bytes": "not base64!!"})).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn bytes_round_trip_through_embedding() {
        let value = bytes_to_value(b"hello");
        assert_eq!(binary_bytes(&value).unwrap().unwrap(), Bytes::from_static(b"hello"));
    }
}

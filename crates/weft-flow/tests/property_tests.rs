//! Property-based tests for weft-flow invariants.
//!
//! These tests use proptest to verify invariants hold across randomly
//! generated payload trees and identifiers.

use proptest::prelude::*;
use serde_json::{Value, json};

use weft_core::JobId;
use weft_flow::externalize::{OBJ_REF_SENTINEL, bytes_to_value, externalize, reinline};
use weft_flow::log::merge_values;
use weft_flow::schema::is_binary_like;

/// Threshold small enough that the generators routinely cross it.
const THRESHOLD: usize = 16;

/// Generates payload field keys (no `/`, which is the path separator).
fn arb_key() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}"
}

/// Generates leaf values: scalars, short and oversized strings, and binary
/// embeddings.
fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
        "[a-z]{24,64}".prop_map(Value::from),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(|bytes| bytes_to_value(&bytes)),
    ]
}

/// Generates arbitrary payload trees of bounded depth.
fn arb_tree() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map(arb_key(), inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Asserts no addressable field in `value` carries an oversized string.
fn assert_no_oversized_fields(root: &Value, threshold: usize) {
    fn check_field(value: &Value, threshold: usize) {
        match value {
            Value::String(s) => {
                assert!(
                    s.len() <= threshold || s == OBJ_REF_SENTINEL,
                    "residual field holds oversized string"
                );
            }
            Value::Object(map) => {
                assert!(!is_binary_like(value), "residual field holds binary embedding");
                for child in map.values() {
                    check_field(child, threshold);
                }
            }
            Value::Array(items) => {
                for child in items {
                    check_field(child, threshold);
                }
            }
            _ => {}
        }
    }

    // The root itself is never extracted; only its fields are addressable.
    if is_binary_like(root) {
        return;
    }
    match root {
        Value::Object(map) => {
            for child in map.values() {
                check_field(child, threshold);
            }
        }
        Value::Array(items) => {
            for child in items {
                check_field(child, threshold);
            }
        }
        _ => {}
    }
}

proptest! {
    /// Externalizing then re-inlining reconstructs a deep-equal tree.
    #[test]
    fn externalize_round_trips(tree in arb_tree()) {
        let split = externalize(&tree, THRESHOLD);
        let rebuilt = reinline(&split.residual, &split.extracted);
        prop_assert_eq!(rebuilt, tree);
    }

    /// The residual tree carries no oversized or binary fields.
    #[test]
    fn residual_is_reference_safe(tree in arb_tree()) {
        let split = externalize(&tree, THRESHOLD);
        assert_no_oversized_fields(&split.residual, THRESHOLD);
    }

    /// Every extracted path resolves to a sentinel in the residual.
    #[test]
    fn extracted_paths_point_at_sentinels(tree in arb_tree()) {
        let split = externalize(&tree, THRESHOLD);
        for entry in &split.extracted {
            let mut cursor = &split.residual;
            for segment in entry.path.split('/') {
                cursor = match cursor {
                    Value::Object(map) => map.get(segment).expect("path segment exists"),
                    Value::Array(items) => {
                        &items[segment.parse::<usize>().expect("numeric index")]
                    }
                    other => panic!("path descends through scalar: {other:?}"),
                };
            }
            prop_assert_eq!(cursor, &json!(OBJ_REF_SENTINEL));
        }
    }

    /// Merging single-field objects with distinct keys unions all fields.
    #[test]
    fn merge_unions_disjoint_fields(
        entries in prop::collection::btree_map(arb_key(), any::<i64>(), 1..8)
    ) {
        let mut base = json!({});
        for (key, value) in &entries {
            merge_values(&mut base, json!({ key.clone(): value }));
        }

        let object = base.as_object().unwrap();
        prop_assert_eq!(object.len(), entries.len());
        for (key, value) in &entries {
            prop_assert_eq!(object.get(key.as_str()), Some(&json!(value)));
        }
    }

    /// Child-id derivation is deterministic and inverts through `parent()`.
    #[test]
    fn child_id_derivation_round_trips(
        parent in "[a-z][a-z0-9-]{0,12}",
        suffix in "[a-z][a-z0-9-]{0,12}",
    ) {
        let parent = JobId::new(&parent).unwrap();
        let child = parent.child(&suffix).unwrap();
        prop_assert_eq!(child.parent().unwrap(), parent.clone());
        prop_assert_eq!(parent.child(&suffix).unwrap(), child);
    }
}

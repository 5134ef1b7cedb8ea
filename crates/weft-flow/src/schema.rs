//! Declarative payload schemas for runtime validation.
//!
//! Job parameters, outputs, and stream messages are dynamically typed
//! (`serde_json::Value`) at the orchestration layer. Rather than trusting
//! payload shapes structurally, every trust boundary — enqueue, stream
//! publish, final output — validates explicitly against a [`PayloadSchema`]
//! and fails with [`Error::SchemaViolation`] on mismatch.
//!
//! Binary payload fields use the `{"$bytes": "<base64>"}` embedding
//! convention; [`PayloadSchema::Binary`] matches exactly that shape.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_core::SpecName;

use crate::error::{Error, Result};

/// The object key marking a binary payload embedding.
pub const BYTES_KEY: &str = "$bytes";

/// A declarative schema for a dynamically typed payload.
///
/// Schemas are pure data: serializable, comparable, and cheap to clone.
/// Validation is structural and recursive; object validation is open-world
/// (undeclared fields pass through), which keeps incremental checkpoint
/// payloads mergeable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSchema {
    /// Accepts any value.
    Any,
    /// Accepts JSON null.
    Null,
    /// Accepts a boolean.
    Bool,
    /// Accepts an integer (no fractional part).
    Integer,
    /// Accepts any JSON number.
    Number,
    /// Accepts a string.
    String,
    /// Accepts a `{"$bytes": "<base64>"}` binary embedding.
    Binary,
    /// Accepts an array whose elements all match the inner schema.
    Array(Box<PayloadSchema>),
    /// Accepts an object with the declared fields.
    Object {
        /// Declared field schemas by name.
        fields: BTreeMap<String, PayloadSchema>,
        /// Declared fields that may be absent.
        optional: BTreeSet<String>,
    },
}

impl PayloadSchema {
    /// Creates an object schema from `(name, schema)` pairs.
    ///
    /// All declared fields are required; see [`PayloadSchema::with_optional`].
    pub fn object<N, I>(fields: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, PayloadSchema)>,
    {
        Self::Object {
            fields: fields
                .into_iter()
                .map(|(name, schema)| (name.into(), schema))
                .collect(),
            optional: BTreeSet::new(),
        }
    }

    /// Creates an array schema with the given element schema.
    #[must_use]
    pub fn array(inner: PayloadSchema) -> Self {
        Self::Array(Box::new(inner))
    }

    /// Marks declared object fields as optional.
    ///
    /// Has no effect on non-object schemas.
    #[must_use]
    pub fn with_optional<N: Into<String>, I: IntoIterator<Item = N>>(mut self, names: I) -> Self {
        if let Self::Object { optional, .. } = &mut self {
            optional.extend(names.into_iter().map(Into::into));
        }
        self
    }

    /// Validates `value` against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaViolation`] naming the offending field path on
    /// the first mismatch encountered.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.validate_at("", value)
    }

    fn validate_at(&self, path: &str, value: &Value) -> Result<()> {
        let violation = |expected: &str| {
            Err(Error::SchemaViolation {
                path: path.to_string(),
                expected: expected.to_string(),
                found: value_kind(value).to_string(),
            })
        };

        match self {
            Self::Any => Ok(()),
            Self::Null => match value {
                Value::Null => Ok(()),
                _ => violation("null"),
            },
            Self::Bool => match value {
                Value::Bool(_) => Ok(()),
                _ => violation("bool"),
            },
            Self::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                _ => violation("integer"),
            },
            Self::Number => match value {
                Value::Number(_) => Ok(()),
                _ => violation("number"),
            },
            Self::String => match value {
                Value::String(_) => Ok(()),
                _ => violation("string"),
            },
            Self::Binary => {
                if is_binary_like(value) {
                    Ok(())
                } else {
                    violation("binary")
                }
            }
            Self::Array(inner) => match value {
                Value::Array(items) => {
                    for (index, item) in items.iter().enumerate() {
                        inner.validate_at(&join_path(path, &index.to_string()), item)?;
                    }
                    Ok(())
                }
                _ => violation("array"),
            },
            Self::Object { fields, optional } => match value {
                Value::Object(map) => {
                    for (name, field_schema) in fields {
                        match map.get(name) {
                            Some(field_value) => {
                                field_schema.validate_at(&join_path(path, name), field_value)?;
                            }
                            None if optional.contains(name) => {}
                            None => {
                                return Err(Error::SchemaViolation {
                                    path: join_path(path, name),
                                    expected: "required field".to_string(),
                                    found: "missing".to_string(),
                                });
                            }
                        }
                    }
                    Ok(())
                }
                _ => violation("object"),
            },
        }
    }
}

/// Returns true if `value` is a `{"$bytes": ...}` binary embedding.
#[must_use]
pub fn is_binary_like(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.len() == 1 && matches!(map.get(BYTES_KEY), Some(Value::String(_))),
        _ => false,
    }
}

/// Returns a short description of a value's kind for diagnostics.
#[must_use]
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) if is_binary_like(value) => "binary",
        Value::Object(_) => "object",
    }
}

pub(crate) fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// The named stream schemas declared by a job specification.
///
/// A set with exactly one entry exposes it as the implicit stream: callers
/// that do not name a stream get the single declared one, whatever its name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamSchemaSet {
    defs: BTreeMap<String, PayloadSchema>,
}

/// The stream name used when a spec declares a single unnamed stream.
pub const DEFAULT_STREAM: &str = "default";

impl StreamSchemaSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set from `(name, schema)` pairs.
    pub fn from_defs<N, I>(defs: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, PayloadSchema)>,
    {
        Self {
            defs: defs
                .into_iter()
                .map(|(name, schema)| (name.into(), schema))
                .collect(),
        }
    }

    /// Adds a named stream schema, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, schema: PayloadSchema) {
        self.defs.insert(name.into(), schema);
    }

    /// Returns true if no streams are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Returns the number of declared streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Returns true if exactly one stream is declared.
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.defs.len() == 1
    }

    /// Resolves a stream by name, or the implicit stream when `name` is
    /// `None`.
    ///
    /// With no name given: a single-entry set resolves to its only entry;
    /// otherwise the entry named [`DEFAULT_STREAM`] is used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStream`] if the stream cannot be resolved.
    pub fn resolve(&self, spec: &SpecName, name: Option<&str>) -> Result<(&str, &PayloadSchema)> {
        let lookup = |n: &str| {
            self.defs
                .get_key_value(n)
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| Error::UnknownStream {
                    name: n.to_string(),
                    spec: spec.clone(),
                })
        };

        match name {
            Some(n) => lookup(n),
            None if self.is_single() => {
                let (k, v) = self.defs.iter().next().expect("single entry");
                Ok((k.as_str(), v))
            }
            None => lookup(DEFAULT_STREAM),
        }
    }
}

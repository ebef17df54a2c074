//! Closed tagged-variant payload value.
//!
//! Payloads arrive as arbitrary JSON, but nothing past the codec touches
//! `serde_json::Value` directly. Handlers pull typed fields out through the
//! `require_*` / `optional_*` accessors, which fail with a [`ValueError`]
//! naming the field and the kind that was found instead.
//!
//! Serialization goes through `serde_json::Value`, so the wire form is plain
//! JSON. Non-finite floats have no JSON form and encode as `null`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A payload value: null, bool, number, string, array or string-keyed object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    /// JSON `null`.
    #[default]
    Null,
    /// JSON `true` / `false`.
    Bool(bool),
    /// Integral number that fits in an `i64`.
    Int(i64),
    /// Any other number.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered list.
    Array(Vec<Value>),
    /// String-keyed mapping, kept sorted for stable encoding.
    Object(BTreeMap<String, Value>),
}

/// A typed field extraction failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The payload is not an object, so it has no fields.
    #[error("payload must be an object, found {found}")]
    NotAnObject {
        /// Kind of the value that was found.
        found: &'static str,
    },

    /// A required field is absent.
    #[error("missing field `{field}`")]
    Missing {
        /// Field name.
        field: String,
    },

    /// A field is present with the wrong kind.
    #[error("field `{field}` must be {expected}, found {found}")]
    Mismatch {
        /// Field name.
        field: String,
        /// Kind the handler needs.
        expected: &'static str,
        /// Kind that was sent.
        found: &'static str,
    },

    /// A field has the right kind but an unusable value.
    #[error("field `{field}` {reason}")]
    Invalid {
        /// Field name.
        field: String,
        /// What is wrong, phrased to follow the field name.
        reason: &'static str,
    },
}

impl ValueError {
    /// Build an [`ValueError::Invalid`].
    pub fn invalid(field: &str, reason: &'static str) -> Self {
        Self::Invalid {
            field: field.to_owned(),
            reason,
        }
    }
}

impl Value {
    /// Build an object from key/value pairs.
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Self)>,
        K: Into<String>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the variant, used in error messages.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Whether this is `null`.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The integer, if this is an integral number.
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The number as a float, for either numeric variant.
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// The string slice, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The elements, if this is an array.
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The entries, if this is an object.
    pub const fn as_object(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a field of an object. Returns `None` for non-objects.
    pub fn get(&self, field: &str) -> Option<&Self> {
        self.as_object().and_then(|map| map.get(field))
    }

    /// Look up a required field.
    pub fn require(&self, field: &str) -> Result<&Self, ValueError> {
        let map = self.as_object().ok_or(ValueError::NotAnObject {
            found: self.kind(),
        })?;
        map.get(field).ok_or_else(|| ValueError::Missing {
            field: field.to_owned(),
        })
    }

    /// Look up a required string field.
    pub fn require_str(&self, field: &str) -> Result<&str, ValueError> {
        let value = self.require(field)?;
        value.as_str().ok_or_else(|| mismatch(field, "a string", value))
    }

    /// Look up a required integer field.
    pub fn require_i64(&self, field: &str) -> Result<i64, ValueError> {
        let value = self.require(field)?;
        value.as_i64().ok_or_else(|| mismatch(field, "an integer", value))
    }

    /// Look up a required object field.
    pub fn require_object(&self, field: &str) -> Result<&BTreeMap<String, Self>, ValueError> {
        let value = self.require(field)?;
        value.as_object().ok_or_else(|| mismatch(field, "an object", value))
    }

    /// Look up an optional string field. `null` counts as absent.
    pub fn optional_str(&self, field: &str) -> Result<Option<&str>, ValueError> {
        self.optional(field)?
            .map(|value| value.as_str().ok_or_else(|| mismatch(field, "a string", value)))
            .transpose()
    }

    /// Look up an optional integer field. `null` counts as absent.
    pub fn optional_i64(&self, field: &str) -> Result<Option<i64>, ValueError> {
        self.optional(field)?
            .map(|value| value.as_i64().ok_or_else(|| mismatch(field, "an integer", value)))
            .transpose()
    }

    /// Look up an optional object field. `null` counts as absent.
    pub fn optional_object(
        &self,
        field: &str,
    ) -> Result<Option<&BTreeMap<String, Self>>, ValueError> {
        self.optional(field)?
            .map(|value| value.as_object().ok_or_else(|| mismatch(field, "an object", value)))
            .transpose()
    }

    fn optional(&self, field: &str) -> Result<Option<&Self>, ValueError> {
        match self {
            // An absent payload is treated like an empty object.
            Self::Null => Ok(None),
            Self::Object(map) => Ok(map.get(field).filter(|v| !v.is_null())),
            other => Err(ValueError::NotAnObject {
                found: other.kind(),
            }),
        }
    }
}

fn mismatch(field: &str, expected: &'static str, found: &Value) -> ValueError {
    ValueError::Mismatch {
        field: field.to_owned(),
        expected,
        found: found.kind(),
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or_default()), Self::Int),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Int(i) => Self::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f).map_or(Self::Null, Self::Number),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<usize> for Value {
    #[allow(clippy::cast_precision_loss)]
    fn from(i: usize) -> Self {
        i64::try_from(i).map_or_else(|_| Self::Float(i as f64), Self::Int)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Self>> for Value {
    fn from(map: BTreeMap<String, Self>) -> Self {
        Self::Object(map)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> Value {
        Value::object([
            ("key", Value::from("k")),
            ("count", Value::from(3_i64)),
            ("ratio", Value::from(0.5)),
            ("nothing", Value::Null),
        ])
    }

    #[test]
    fn integers_and_floats_stay_distinct() {
        let json: serde_json::Value = serde_json::json!({"a": 5, "b": 5.0});
        let value = Value::from(json);
        assert_eq!(value.get("a"), Some(&Value::Int(5)));
        assert_eq!(value.get("b"), Some(&Value::Float(5.0)));
    }

    #[test]
    fn require_reports_missing_field() {
        let err = payload().require_str("absent").err();
        assert_eq!(
            err,
            Some(ValueError::Missing {
                field: "absent".to_owned()
            })
        );
    }

    #[test]
    fn require_reports_kind_mismatch() {
        let err = payload().require_i64("key").err();
        assert_eq!(
            err,
            Some(ValueError::Mismatch {
                field: "key".to_owned(),
                expected: "an integer",
                found: "string",
            })
        );
    }

    #[test]
    fn optional_treats_null_as_absent() {
        assert_eq!(payload().optional_i64("nothing"), Ok(None));
        assert_eq!(payload().optional_i64("count"), Ok(Some(3)));
        assert_eq!(Value::Null.optional_str("anything"), Ok(None));
    }

    #[test]
    fn fields_of_non_object_are_rejected() {
        let err = Value::from("text").require("key").err();
        assert_eq!(err, Some(ValueError::NotAnObject { found: "string" }));
    }

    #[test]
    fn non_finite_float_encodes_as_null() {
        let json = serde_json::to_string(&Value::Float(f64::NAN)).unwrap_or_default();
        assert_eq!(json, "null");
    }

    #[test]
    fn serde_round_trip_preserves_nesting() {
        let original = Value::object([
            ("list", Value::from(vec![Value::from(1_i64), Value::from("two")])),
            ("inner", payload()),
        ]);
        let json = serde_json::to_string(&original).unwrap_or_default();
        let restored: Value = serde_json::from_str(&json).unwrap_or_default();
        assert_eq!(restored, original);
    }
}

//! Values held by record fields.

use serde_json::Value;

use super::record::RecordRef;

/// The value of one record field
#[derive(Debug, Clone, Default)]
pub enum FieldValue {
    /// No value (absent, null, or an empty string/list/object)
    #[default]
    Empty,

    /// Plain JSON value copied from a payload
    Scalar(Value),

    /// A nested entity
    Record(RecordRef),

    /// A list of nested entities
    Records(Vec<RecordRef>),
}

impl FieldValue {
    /// Wrap a JSON value, folding every flavour of emptiness into `Empty`
    pub fn from_json(value: Value) -> Self {
        if json_is_empty(&value) {
            FieldValue::Empty
        } else {
            FieldValue::Scalar(value)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Scalar(v) => json_is_empty(v),
            FieldValue::Record(_) => false,
            FieldValue::Records(list) => list.is_empty(),
        }
    }

    /// Borrow a scalar as a string slice, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FieldValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&RecordRef> {
        match self {
            FieldValue::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Nested records; empty for every non-list value
    pub fn as_records(&self) -> &[RecordRef] {
        match self {
            FieldValue::Records(list) => list,
            _ => &[],
        }
    }

    /// Render the value as text: strings verbatim, other JSON serialized,
    /// records by identifier, and `Empty` as the empty string.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Empty => String::new(),
            FieldValue::Scalar(Value::String(s)) => s.clone(),
            FieldValue::Scalar(v) => v.to_string(),
            FieldValue::Record(r) => r.identifier().to_string(),
            FieldValue::Records(list) => list
                .iter()
                .map(|r| r.identifier())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    /// JSON view of the value. Nested records are rendered from the values
    /// they currently hold; nothing is expanded or fetched.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Empty => Value::Null,
            FieldValue::Scalar(v) => v.clone(),
            FieldValue::Record(r) => r.snapshot(),
            FieldValue::Records(list) => Value::Array(list.iter().map(|r| r.snapshot()).collect()),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (a, b) if a.is_empty() && b.is_empty() => true,
            (FieldValue::Scalar(a), FieldValue::Scalar(b)) => ordered(a) == ordered(b),
            (FieldValue::Record(a), FieldValue::Record(b)) => a == b,
            (FieldValue::Records(a), FieldValue::Records(b)) => {
                let mut a: Vec<_> = a.iter().collect();
                let mut b: Vec<_> = b.iter().collect();
                a.sort();
                b.sort();
                a == b
            }
            _ => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::from_json(Value::String(s.to_string()))
    }
}

/// Whether a JSON value counts as "no value"
pub fn json_is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Canonical form of a JSON value: arrays are sorted so that list order
/// does not matter, and object keys are already ordered by `serde_json`.
pub fn ordered(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(ordered).collect();
            items.sort_by_key(|v| v.to_string());
            Value::Array(items)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), ordered(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

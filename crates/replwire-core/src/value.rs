//! Typed values decoded from console replies.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A value decoded from a console reply.
///
/// Every successful evaluation resolves to exactly one of these variants, so
/// call sites handle a closed set of outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParsedValue {
    /// `nil` / `null`
    Nil,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// String, quotes stripped
    Str(String),
    /// Ordered list
    Array(Vec<ParsedValue>),
    /// String-keyed map
    Object(BTreeMap<String, ParsedValue>),
}

impl ParsedValue {
    /// Whether this is `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, ParsedValue::Nil)
    }

    /// Integer value, if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParsedValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean value, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParsedValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String slice, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParsedValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Elements, if this is an `Array`.
    pub fn as_array(&self) -> Option<&[ParsedValue]> {
        match self {
            ParsedValue::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Field lookup, if this is an `Object`.
    pub fn get(&self, key: &str) -> Option<&ParsedValue> {
        match self {
            ParsedValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Variant name, used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParsedValue::Nil => "nil",
            ParsedValue::Bool(_) => "bool",
            ParsedValue::Int(_) => "int",
            ParsedValue::Float(_) => "float",
            ParsedValue::Str(_) => "str",
            ParsedValue::Array(_) => "array",
            ParsedValue::Object(_) => "object",
        }
    }
}

impl From<serde_json::Value> for ParsedValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => ParsedValue::Nil,
            Value::Bool(b) => ParsedValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => ParsedValue::Int(i),
                None => ParsedValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => ParsedValue::Str(s),
            Value::Array(items) => {
                ParsedValue::Array(items.into_iter().map(ParsedValue::from).collect())
            }
            Value::Object(map) => ParsedValue::Object(
                map.into_iter()
                    .map(|(k, v)| (k, ParsedValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ParsedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

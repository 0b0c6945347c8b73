//! Canonical scalar value representation shared by fragments, cradle params,
//! and runtime result rows.
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed value tagged with explicit type information so compiled plans and
/// result rows stay unambiguous across backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Null literal.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Signed 64-bit integer literal.
    Int(i64),
    /// 64-bit floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    String(String),
    /// Arbitrary binary payload represented as bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the type name used in error messages and plan dumps.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Compares two values of compatible types.
    ///
    /// Integers and floats compare numerically with each other. Any other
    /// cross-type comparison, and any comparison involving null, yields `None`.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Parses a bare literal as written in a raw filter string.
    ///
    /// Quoted text becomes a string, `null`/`true`/`false` map to their
    /// literals, finite numbers parse as int or float, and anything else
    /// (including `inf` and `NaN`) is kept as an unquoted string.
    pub fn parse_literal(text: &str) -> Value {
        let text = text.trim();
        if text.len() >= 2 {
            let bytes = text.as_bytes();
            let first = bytes[0];
            let last = bytes[text.len() - 1];
            if (first == b'\'' || first == b'"') && first == last {
                return Value::String(text[1..text.len() - 1].to_owned());
            }
        }
        match text.to_ascii_lowercase().as_str() {
            "null" => return Value::Null,
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(int) = text.parse::<i64>() {
            return Value::Int(int);
        }
        if let Ok(float) = text.parse::<f64>() {
            if float.is_finite() {
                return Value::Float(float);
            }
        }
        Value::String(text.to_owned())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = String;

    /// Lifts a plain JSON scalar. Arrays and objects have no scalar form.
    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value as Json;
        match value {
            Json::Null => Ok(Value::Null),
            Json::Bool(v) => Ok(Value::Bool(v)),
            Json::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float))
                .ok_or_else(|| format!("number {n} is out of range")),
            Json::String(v) => Ok(Value::String(v)),
            Json::Array(_) => Err("arrays are not scalar values".into()),
            Json::Object(_) => Err("objects are not scalar values".into()),
        }
    }
}

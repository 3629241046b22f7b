//! The tagged message stream
//!
//! FIT containers are decoded by an external tool into an ordered list of
//! messages. Each message has a kind ("record", "session", "sport",
//! "monitoring", ...) and named fields, and every field carries two values:
//!
//! - `value`: the decoder's converted value (scaled, offset, enum label)
//! - `raw_value`: the integer as stored on the device
//!
//! Ingestion only ever asks for "all messages of kind X, in file order", so
//! that is the whole of the [`MessageSource`] trait.

pub mod json;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One decoded field value.
///
/// Decoders emit booleans and nested objects for some vendor fields. Those
/// are kept as-is so an unknown field never fails the parse; they have no
/// numeric or text view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Other(serde_json::Value),
}

impl Value {
    /// Integer view; floats only qualify when they have no fractional part
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// A named field with its converted and raw values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub raw_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
}

impl Field {
    /// Raw integer, falling back to an integral converted value
    pub fn raw_integer(&self) -> Option<i64> {
        self.raw_value
            .as_ref()
            .and_then(Value::as_i64)
            .or_else(|| self.value.as_ref().and_then(Value::as_i64))
    }

    /// Converted integer, falling back to the raw value
    pub fn integer(&self) -> Option<i64> {
        self.value
            .as_ref()
            .and_then(Value::as_i64)
            .or_else(|| self.raw_value.as_ref().and_then(Value::as_i64))
    }
}

/// One decoded message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    #[serde(alias = "name")]
    pub kind: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

impl DecodedMessage {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            fields: Vec::new(),
        }
    }

    /// Add a field whose converted and raw values are the same
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.with_raw(name, value.clone(), value)
    }

    /// Add a field with distinct converted and raw values
    pub fn with_raw(mut self, name: &str, value: impl Into<Value>, raw: impl Into<Value>) -> Self {
        self.fields.push(Field {
            name: name.to_string(),
            value: Some(value.into()),
            raw_value: Some(raw.into()),
            units: None,
        });
        self
    }

    /// Add a field the decoder reported with no value
    pub fn with_null(mut self, name: &str) -> Self {
        self.fields.push(Field {
            name: name.to_string(),
            value: None,
            raw_value: None,
            units: None,
        });
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Access to a decoded file's messages by kind
pub trait MessageSource {
    /// All messages of `kind`, in stream order
    fn messages(&self, kind: &str) -> Vec<&DecodedMessage>;
}

/// A fully decoded file held in memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedFile {
    pub messages: Vec<DecodedMessage>,
}

impl DecodedFile {
    pub fn new(messages: Vec<DecodedMessage>) -> Self {
        Self { messages }
    }

    /// Message count per kind, for `localfit inspect`
    pub fn kind_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for m in &self.messages {
            *counts.entry(m.kind.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

impl MessageSource for DecodedFile {
    fn messages(&self, kind: &str) -> Vec<&DecodedMessage> {
        self.messages.iter().filter(|m| m.kind == kind).collect()
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque payload carried by a transition. Views match on the shape they expect.
pub type Payload = Value;

/// Named parameters handed to a query implementation.
pub type QueryParams = Map<String, Value>;

/// How the origin view is treated while the target view runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Suspend the origin for the duration of the call, resume afterwards.
    Modal = 1,
    /// Retire the origin permanently.
    Replace = 2,
    /// Leave the origin untouched.
    Open = 3,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Modal => "modal",
            Mode::Replace => "replace",
            Mode::Open => "open",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for Mode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Mode::Modal),
            2 => Ok(Mode::Replace),
            3 => Ok(Mode::Open),
            other => Err(other),
        }
    }
}

/// What a view hands back from `inflow`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub title: String,
    pub result: Value,
}

impl Outcome {
    pub fn new(title: impl Into<String>, result: Value) -> Self {
        Self {
            title: title.into(),
            result,
        }
    }

    pub fn titled(title: impl Into<String>) -> Self {
        Self::new(title, Value::Null)
    }
}

/// A primary-key value as supplied by a view: one scalar or an ordered composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Composite(Vec<Value>),
    Single(Value),
}

impl KeyValue {
    pub fn values(&self) -> Vec<Value> {
        match self {
            KeyValue::Single(value) => vec![value.clone()],
            KeyValue::Composite(values) => values.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            KeyValue::Single(_) => 1,
            KeyValue::Composite(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Value> for KeyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(values) => KeyValue::Composite(values),
            other => KeyValue::Single(other),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.values().iter().map(scalar_text).collect();
        f.write_str(&parts.join(","))
    }
}

/// A raw entity read from the persistence collaborator, before presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub module: String,
    pub table: String,
    /// Primary-key values in declaration order.
    pub key: Vec<Value>,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn key_text(&self) -> String {
        self.key.iter().map(scalar_text).collect::<Vec<_>>().join(",")
    }
}

/// Renders a scalar without the JSON quoting strings would otherwise get.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Field descriptors: one schema column each.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use serde::{Deserialize, Serialize};

use crate::format::FormatSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Integer,
    Float,
    Text,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Integer => "integer",
            FieldKind::Float => "float",
            FieldKind::Text => "text",
        }
    }

    /// Not-applicable value used when a descriptor declares no default.
    pub fn fallback_default(self) -> Value {
        match self {
            FieldKind::Integer => Value::Integer(i64::MIN),
            FieldKind::Float => Value::Float(-999.0),
            FieldKind::Text => Value::Text("-".to_string()),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Integer(_) => FieldKind::Integer,
            Value::Float(_) => FieldKind::Float,
            Value::Text(_) => FieldKind::Text,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Bitwise identity: NaN equals NaN, `0.0` differs from `-0.0`.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            _ => false,
        }
    }

    /// Feeds the value into `state` consistently with [`Value::same_as`].
    pub fn hash_identity<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Integer(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            Value::Float(f) => {
                1u8.hash(state);
                f.to_bits().hash(state);
            }
            Value::Text(s) => {
                2u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Position of a field in its schema's declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(usize);

impl FieldId {
    pub const fn new(index: usize) -> Self {
        FieldId(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_magnitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default = "FieldDescriptor::default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDescriptor {
            name: name.into(),
            kind,
            format: None,
            default: None,
            max_magnitude: None,
            max_length: None,
            required: true,
            sql_type: None,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn text(name: impl Into<String>, max_length: usize) -> Self {
        Self::new(name, FieldKind::Text).max_length(max_length)
    }

    pub const fn default_required() -> bool {
        true
    }

    pub fn format(mut self, spec: FormatSpec) -> Self {
        self.format = Some(spec);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn max_magnitude(mut self, bound: f64) -> Self {
        self.max_magnitude = Some(bound);
        self
    }

    pub fn max_length(mut self, length: usize) -> Self {
        self.max_length = Some(length);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }

    /// The effective render format.
    pub fn render_format(&self) -> FormatSpec {
        self.format
            .clone()
            .unwrap_or_else(|| FormatSpec::default_for(self.kind))
    }

    /// The effective not-applicable value.
    pub fn na_value(&self) -> Value {
        self.default
            .clone()
            .unwrap_or_else(|| self.kind.fallback_default())
    }

    /// Returns a description of the violated bound, if any.
    pub fn bound_violation(&self, value: &Value) -> Option<String> {
        match value {
            Value::Integer(i) => self
                .max_magnitude
                .filter(|bound| (*i as f64) >= *bound)
                .map(|bound| format!("must be < {bound}")),
            Value::Float(f) => self
                .max_magnitude
                .filter(|bound| *f >= *bound)
                .map(|bound| format!("must be < {bound}")),
            Value::Text(s) => self
                .max_length
                .filter(|limit| s.chars().count() > *limit)
                .map(|limit| format!("length cannot be > {limit}")),
        }
    }
}

//! Host-visible properties and their cached values.
//!
//! A [`PropertySpec`] describes a property once, at construction: its name,
//! semantic type, mutability class and optional numeric bounds. Adapters keep
//! the last-known value of each property in a [`Cached`] slot inside their
//! locked state, so reads are served without a device round trip.
//!
//! # Write semantics
//!
//! ```text
//! set(value)
//!   ├─ pre-init property      → cache := value; reset connection if initialized
//!   └─ always-mutable property
//!        ├─ value == cached   → nothing (no device access)
//!        └─ value != cached   → cache := value, then device write
//!                               (a failed write does not restore the old value)
//! ```
//!
//! Whether a pre-init property may still be written after initialization is
//! enforced by the host registry, not here.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdapterError, AdapterResult};

/// Semantic type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyKind {
    /// Text value.
    String,
    /// Signed integer value.
    Integer,
    /// Floating-point value.
    Float,
    /// Boolean value.
    Bool,
}

/// When a property may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutability {
    /// Writable only before the first connection; later edits force a reconnect.
    PreInit,
    /// Writable at any time.
    Always,
    /// Never writable by the host.
    ReadOnly,
}

/// A property value as exchanged with the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Integer(i64),
    /// Floating-point value.
    Float(f64),
    /// Text value.
    String(String),
}

impl PropertyValue {
    /// The semantic type carried by this value.
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::String(_) => PropertyKind::String,
            PropertyValue::Integer(_) => PropertyKind::Integer,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Bool(_) => PropertyKind::Bool,
        }
    }

    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Integer(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view; floats are accepted only when they are whole numbers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(v) => Some(*v),
            PropertyValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// The text, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// The flag, if this is a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{s}"),
            PropertyValue::Integer(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

/// Static description of a host-visible property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Name shown to the host.
    pub name: String,
    /// Semantic type.
    pub kind: PropertyKind,
    /// When the host may write it.
    pub mutability: Mutability,
    /// Inclusive numeric bounds, if any.
    pub bounds: Option<(f64, f64)>,
    /// Value the property starts with.
    pub default: PropertyValue,
}

impl PropertySpec {
    /// Create an always-mutable property whose kind follows the default value.
    pub fn new(name: impl Into<String>, default: impl Into<PropertyValue>) -> Self {
        let default = default.into();
        Self {
            name: name.into(),
            kind: default.kind(),
            mutability: Mutability::Always,
            bounds: None,
            default,
        }
    }

    /// Mark the property as pre-initialization only.
    pub fn pre_init(mut self) -> Self {
        self.mutability = Mutability::PreInit;
        self
    }

    /// Mark the property as read-only.
    pub fn read_only(mut self) -> Self {
        self.mutability = Mutability::ReadOnly;
        self
    }

    /// Attach inclusive numeric bounds.
    pub fn with_limits(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some((min, max));
        self
    }

    /// Lower bound, if bounded.
    pub fn lower_limit(&self) -> Option<f64> {
        self.bounds.map(|(min, _)| min)
    }

    /// Upper bound, if bounded.
    pub fn upper_limit(&self) -> Option<f64> {
        self.bounds.map(|(_, max)| max)
    }

    /// Check a candidate value against the kind and bounds of this property.
    ///
    /// Integers are accepted for float properties; whole floats are accepted
    /// for integer properties.
    pub fn validate(&self, value: &PropertyValue) -> AdapterResult<()> {
        let kind_ok = match self.kind {
            PropertyKind::String => value.as_str().is_some(),
            PropertyKind::Bool => value.as_bool().is_some(),
            PropertyKind::Integer => value.as_i64().is_some(),
            PropertyKind::Float => value.as_f64().is_some(),
        };
        if !kind_ok {
            return Err(AdapterError::invalid_value(
                &self.name,
                format!("expected {:?}, got {:?}", self.kind, value.kind()),
            ));
        }

        if let (Some((min, max)), Some(v)) = (self.bounds, value.as_f64()) {
            if v < min || v > max {
                return Err(AdapterError::invalid_value(
                    &self.name,
                    format!("{v} is outside [{min}, {max}]"),
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of writing a value into a [`Cached`] slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The new value equals the cached one; nothing was touched.
    Unchanged,
    /// The cache now holds the new value.
    Changed,
}

/// Last-known value of a property.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    value: T,
}

impl<T: Clone + PartialEq> Cached<T> {
    /// Cache holding `value`.
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// The cached value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Unconditionally overwrite the cached value.
    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    /// Store `value` if it differs from the cached one.
    ///
    /// The cache is updated before any device write is attempted by the
    /// caller and is not restored if that write fails.
    pub fn update(&mut self, value: T) -> Change {
        if self.value == value {
            Change::Unchanged
        } else {
            self.value = value;
            Change::Changed
        }
    }
}

/// Look up a spec by name.
pub fn find_spec<'a>(specs: &'a [PropertySpec], name: &str) -> AdapterResult<&'a PropertySpec> {
    specs
        .iter()
        .find(|spec| spec.name == name)
        .ok_or_else(|| AdapterError::UnknownProperty(name.to_string()))
}

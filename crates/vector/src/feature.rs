//! Features: optional geometry plus attribute values aligned with a field set

use std::fmt;

use geo_types::Geometry;
use serde::{Deserialize, Serialize};

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum AttributeValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text used to match join keys; integral floats match integers.
    /// Null never matches.
    pub fn join_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => {
                Some(format!("{}", *v as i64))
            }
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// Feature identifier, unique within a layer
pub type FeatureId = u64;

/// A geographic feature with geometry and attributes
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    id: FeatureId,
    /// Feature geometry
    pub geometry: Option<Geometry<f64>>,
    /// Values in field order of the owning layer
    pub attributes: Vec<AttributeValue>,
}

impl Feature {
    /// Create a new feature with geometry
    pub fn new(id: FeatureId, geometry: Geometry<f64>) -> Self {
        Self {
            id,
            geometry: Some(geometry),
            attributes: Vec::new(),
        }
    }

    /// Create a feature with no geometry
    pub fn empty(id: FeatureId) -> Self {
        Self {
            id,
            geometry: None,
            attributes: Vec::new(),
        }
    }

    /// Builder-style attribute list
    pub fn with_attributes(mut self, attributes: Vec<AttributeValue>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn id(&self) -> FeatureId {
        self.id
    }

    /// Value at a field index; missing trailing values read as Null
    pub fn attribute(&self, index: usize) -> &AttributeValue {
        const NULL: AttributeValue = AttributeValue::Null;
        self.attributes.get(index).unwrap_or(&NULL)
    }

    /// Set a value, growing the attribute list with Nulls if needed
    pub fn set_attribute(&mut self, index: usize, value: AttributeValue) {
        if self.attributes.len() <= index {
            self.attributes.resize(index + 1, AttributeValue::Null);
        }
        self.attributes[index] = value;
    }
}

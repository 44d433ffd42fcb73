//! Typed property values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CanopyError, Result};
use crate::model::path::Path;

/// A single typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Binary(Vec<u8>),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Date(chrono::DateTime<chrono::Utc>),
    /// A qualified name, e.g. a node type.
    Name(String),
    Path(Path),
    /// The identifier of another node.
    Reference(Uuid),
}

impl PropertyValue {
    /// Returns the text if this is a `String` or `Name` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Name(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<Uuid> {
        match self {
            PropertyValue::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Text used for full-text indexing; binary values are not indexed.
    pub fn indexable_text(&self) -> Option<String> {
        match self {
            PropertyValue::String(s) | PropertyValue::Name(s) => Some(s.clone()),
            PropertyValue::Binary(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) | PropertyValue::Name(s) => f.write_str(s),
            PropertyValue::Binary(b) => write!(f, "<{} bytes>", b.len()),
            PropertyValue::Long(v) => write!(f, "{v}"),
            PropertyValue::Double(v) => write!(f, "{v}"),
            PropertyValue::Boolean(v) => write!(f, "{v}"),
            PropertyValue::Date(dt) => write!(f, "{}", dt.to_rfc3339()),
            PropertyValue::Path(p) => write!(f, "{p}"),
            PropertyValue::Reference(id) => write!(f, "{id}"),
        }
    }
}

// --- Conversions ---

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Long(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Long(v as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Double(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Boolean(v)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for PropertyValue {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        PropertyValue::Date(dt)
    }
}

impl From<Path> for PropertyValue {
    fn from(p: Path) -> Self {
        PropertyValue::Path(p)
    }
}

impl From<Uuid> for PropertyValue {
    fn from(id: Uuid) -> Self {
        PropertyValue::Reference(id)
    }
}

/// A named property with one or more ordered values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    name: String,
    values: Vec<PropertyValue>,
}

impl Property {
    /// Create a single-valued property.
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Property {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    /// Create a multi-valued property. Fails if `values` is empty.
    pub fn multi(name: impl Into<String>, values: Vec<PropertyValue>) -> Result<Self> {
        let name = name.into();
        if values.is_empty() {
            return Err(CanopyError::invalid_argument(format!(
                "property '{name}' must have at least one value"
            )));
        }
        Ok(Property { name, values })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }

    pub fn first_value(&self) -> &PropertyValue {
        &self.values[0]
    }

    pub fn is_multiple(&self) -> bool {
        self.values.len() > 1
    }
}

/// A node's properties keyed by unique name.
pub type Properties = BTreeMap<String, Property>;

/// Collect properties into a [`Properties`] map, last one wins per name.
pub fn properties<I>(props: I) -> Properties
where
    I: IntoIterator<Item = Property>,
{
    props
        .into_iter()
        .map(|p| (p.name().to_string(), p))
        .collect()
}

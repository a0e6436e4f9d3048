//! Connector operation types
//!
//! UIDs, attribute sets and the external records a connector streams back
//! during synchronization.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved attribute name exposing a record's [`Uid`] value.
pub const UID_ATTRIBUTE: &str = "__UID__";

/// Reserved attribute name exposing a record's naming attribute (e.g. an LDAP DN).
pub const NAME_ATTRIBUTE: &str = "__NAME__";

/// Unique identifier for an object in an external system.
///
/// Different systems use different identifier schemes:
/// - LDAP: entryUUID or Distinguished Name
/// - Database: Primary key column value
/// - HR system: Employee number
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uid {
    /// The attribute name used as the identifier (e.g., "entryUUID", "id").
    attribute_name: String,
    /// The actual value of the identifier.
    value: String,
}

impl Uid {
    /// Create a new UID with the given attribute name and value.
    pub fn new(attribute_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            value: value.into(),
        }
    }

    /// Create a UID using the default "uid" attribute name.
    pub fn from_value(value: impl Into<String>) -> Self {
        Self::new("uid", value)
    }

    /// Get the attribute name.
    pub fn attribute_name(&self) -> &str {
        &self.attribute_name
    }

    /// Get the value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// A UID without a value cannot be correlated or linked.
    pub fn is_blank(&self) -> bool {
        self.value.trim().is_empty()
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.attribute_name, self.value)
    }
}

/// An ordered set of attributes.
///
/// Attribute order is stable (sorted by name) so records and change requests
/// serialize and log deterministically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSet {
    /// Map of attribute name to attribute value(s).
    #[serde(flatten)]
    attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeSet {
    /// Create a new empty attribute set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an attribute value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Set an attribute using builder pattern.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Get an attribute value.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Get a single-valued string attribute.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.as_string())
    }

    /// Get a multi-valued string attribute.
    pub fn get_strings(&self, name: &str) -> Option<Vec<&str>> {
        self.get(name).map(|v| v.as_strings())
    }

    /// Get all attribute names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    /// Get the number of attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Iterate over all attributes in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.attributes.iter()
    }

    /// Overwrite attributes with the values from `other`.
    pub fn merge(&mut self, other: &AttributeSet) {
        for (name, value) in other.iter() {
            self.attributes.insert(name.clone(), value.clone());
        }
    }
}

/// A value for an attribute, which may be single or multi-valued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// No value (null).
    Null,
    /// A single string value.
    String(String),
    /// A single integer value.
    Integer(i64),
    /// A single boolean value.
    Boolean(bool),
    /// Multiple values.
    Array(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Check if this is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Get as a string if this is a single string value.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as strings (works for both single and multi-valued).
    pub fn as_strings(&self) -> Vec<&str> {
        match self {
            AttributeValue::String(s) => vec![s.as_str()],
            AttributeValue::Array(arr) => arr.iter().filter_map(|v| v.as_string()).collect(),
            _ => vec![],
        }
    }

    /// Render every scalar value as text, flattening arrays.
    ///
    /// Used for correlation where integer employee numbers must compare
    /// against string attributes.
    pub fn to_text_values(&self) -> Vec<String> {
        match self {
            AttributeValue::Null => vec![],
            AttributeValue::String(s) => vec![s.clone()],
            AttributeValue::Integer(i) => vec![i.to_string()],
            AttributeValue::Boolean(b) => vec![b.to_string()],
            AttributeValue::Array(arr) => arr.iter().flat_map(|v| v.to_text_values()).collect(),
        }
    }

    /// Check if this is multi-valued.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, AttributeValue::Array(_))
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(vec: Vec<T>) -> Self {
        AttributeValue::Array(vec.into_iter().map(Into::into).collect())
    }
}

/// An object as returned by a connector: stable UID, optional naming
/// attribute, object class and the attribute values read from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRecord {
    uid: Uid,
    name: Option<String>,
    object_class: String,
    attributes: AttributeSet,
}

impl ExternalRecord {
    /// Create a record with no naming attribute.
    pub fn new(uid: Uid, object_class: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            uid,
            name: None,
            object_class: object_class.into(),
            attributes,
        }
    }

    /// Set the naming attribute (e.g. LDAP DN).
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn object_class(&self) -> &str {
        &self.object_class
    }

    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Text values of an attribute, resolving [`UID_ATTRIBUTE`] and
    /// [`NAME_ATTRIBUTE`] to the record's identifiers.
    pub fn values_of(&self, attribute: &str) -> Vec<String> {
        match attribute {
            UID_ATTRIBUTE => vec![self.uid.value().to_string()],
            NAME_ATTRIBUTE => self.name.iter().cloned().collect(),
            other => self
                .attributes
                .get(other)
                .map(AttributeValue::to_text_values)
                .unwrap_or_default(),
        }
    }
}

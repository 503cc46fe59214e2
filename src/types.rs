//! Core types for the metadata model and document state.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field types a schema can declare.
///
/// Wire names follow the backend convention, including the embedded spaces.
/// Types the client does not know render as plain text controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Data,
    Select,
    Link,
    Int,
    Float,
    Currency,
    Date,
    Check,
    Text,
    #[serde(rename = "Small Text")]
    SmallText,
    #[serde(rename = "Read Only")]
    ReadOnly,
    #[serde(rename = "Section Break")]
    SectionBreak,
    #[serde(rename = "Column Break")]
    ColumnBreak,
    #[serde(other)]
    Other,
}

impl FieldType {
    /// Layout fields carry no value and produce no input control.
    pub fn is_layout(&self) -> bool {
        matches!(self, FieldType::SectionBreak | FieldType::ColumnBreak)
    }
}

/// One field descriptor within a [`DocTypeMeta`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocField {
    /// Unique key within the owning meta.
    pub fieldname: String,
    #[serde(default)]
    pub label: String,
    pub fieldtype: FieldType,
    /// Newline-delimited choices for Select, target schema identifier for Link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
    #[serde(default, rename = "reqd", with = "flag")]
    pub required: bool,
    #[serde(default, with = "flag")]
    pub read_only: bool,
    #[serde(default, with = "flag")]
    pub hidden: bool,
    /// `"<sourceField>.<remoteAttribute>"` copy rule, applied on value change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mandatory_depends_on: Option<String>,
    #[serde(default, skip_serializing_if = "FieldValue::is_null")]
    pub default: FieldValue,
}

impl DocField {
    /// Split `fetch_from` into its `(source_field, remote_attribute)` parts.
    pub fn fetch_rule(&self) -> Option<(&str, &str)> {
        self.fetch_from.as_deref()?.split_once('.')
    }
}

/// The schema describing a document type. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocTypeMeta {
    /// Schema identifier, unique on the backend.
    pub name: String,
    pub fields: Vec<DocField>,
    #[serde(default, with = "flag")]
    pub is_submittable: bool,
}

impl DocTypeMeta {
    /// Look up a field descriptor by fieldname.
    pub fn field(&self, fieldname: &str) -> Option<&DocField> {
        self.fields.iter().find(|f| f.fieldname == fieldname)
    }

    /// All fields whose `fetch_from` copies from `source_field`, paired with
    /// the remote attribute each one wants.
    pub fn fetch_targets(&self, source_field: &str) -> Vec<(&DocField, &str)> {
        self.fields
            .iter()
            .filter_map(|f| match f.fetch_rule() {
                Some((src, attr)) if src == source_field => Some((f, attr)),
                _ => None,
            })
            .collect()
    }

    /// Target schema identifier of a Link field, from its `options`.
    pub fn link_target(&self, fieldname: &str) -> Option<&str> {
        let field = self.field(fieldname)?;
        field.options.as_deref().filter(|s| !s.is_empty())
    }
}

/// Closed value variant for document fields.
///
/// Booleans arriving on the wire are coerced to `Int(0|1)`; Check fields only
/// ever hold 0 or 1. Nested arrays and objects (child tables) are outside
/// this client's scope and are dropped at the transport boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    #[default]
    Null,
}

impl FieldValue {
    /// The only constructor for Check-field values: `true` → 1, `false` → 0.
    pub fn check(on: bool) -> Self {
        FieldValue::Int(i64::from(on))
    }

    /// Null or empty string. Empty values suppress fetch-from propagation.
    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Null) || matches!(self, FieldValue::Str(s) if s.is_empty())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Truthiness for condition evaluation: null, `""`, and 0 are false.
    pub fn truthy(&self) -> bool {
        match self {
            FieldValue::Null => false,
            FieldValue::Str(s) => !s.is_empty(),
            FieldValue::Int(n) => *n != 0,
            FieldValue::Float(n) => *n != 0.0,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON scalar. Booleans become 0/1; arrays and objects are
    /// not representable and return `None`.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(FieldValue::Null),
            Value::Bool(b) => Some(FieldValue::check(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(FieldValue::Int(i))
                } else {
                    n.as_f64().map(FieldValue::Float)
                }
            }
            Value::String(s) => Some(FieldValue::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Int(n) => Value::from(*n),
            FieldValue::Float(n) => Value::from(*n),
            FieldValue::Null => Value::Null,
        }
    }
}

impl fmt::Display for FieldValue {
    /// Raw-string marshaling for input controls; null renders empty.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Int(n) => write!(f, "{}", n),
            FieldValue::Float(n) => write!(f, "{}", n),
            FieldValue::Null => Ok(()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Str(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Float(n)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FieldValue::from_json(&value)
            .ok_or_else(|| D::Error::custom("expected a scalar field value"))
    }
}

/// One record instance: a mapping from fieldname to value, shaped by its
/// [`DocTypeMeta`] but not statically typed against it.
///
/// A non-empty `name` entry marks an existing record; its absence marks a
/// new, unsaved one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    values: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.values.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.values.remove(field)
    }

    /// The record's identity in the remote store, when it has one.
    pub fn identity(&self) -> Option<&str> {
        self.values
            .get("name")
            .and_then(FieldValue::as_str)
            .filter(|s| !s.is_empty())
    }

    /// A document without an identity has never been saved.
    pub fn is_new(&self) -> bool {
        self.identity().is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Convert a JSON object into a document. Non-scalar entries (child
    /// tables, nested objects) are dropped; the backend treats fields absent
    /// from an update as unchanged, so dropping is lossless on save.
    pub fn from_json(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut doc = Document::new();
        for (key, entry) in map {
            match FieldValue::from_json(entry) {
                Some(v) => doc.set(key.clone(), v),
                None => {
                    tracing::debug!(field = %key, "dropping non-scalar document entry");
                }
            }
        }
        Some(doc)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, FieldValue)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Document {
            values: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (k, v) in &self.values {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Document::from_json(&value).ok_or_else(|| D::Error::custom("document must be a JSON object"))
    }
}

/// Serde helper for the backend's 0/1 flags. Absent means false; booleans
/// are tolerated on input.
mod flag {
    use serde::de::Deserializer;
    use serde::ser::Serializer;
    use serde::Deserialize;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(u8),
            Bool(bool),
            Null(()),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            Some(Raw::Flag(n)) => Ok(n != 0),
            Some(Raw::Bool(b)) => Ok(b),
            Some(Raw::Null(())) | None => Ok(false),
        }
    }
}

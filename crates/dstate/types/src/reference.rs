//! Addressing for state-machine instances.
//!
//! A [`Reference`] is the only identity shared between the locking and the
//! persistence layers: both key their resources by it, so neither needs an
//! external id scheme.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a state-machine type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineKind(pub String);

impl MachineKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MachineKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for MachineKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

/// A single value inside a reference key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl KeyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            KeyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// JSON form, as used in document filters.
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::Bool(v) => Value::Bool(*v),
            KeyValue::Int(v) => Value::from(*v),
            KeyValue::Str(v) => Value::String(v.clone()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Bool(v) => write!(f, "{v}"),
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        KeyValue::Bool(v)
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(i64::from(v))
    }
}

impl From<u32> for KeyValue {
    fn from(v: u32) -> Self {
        KeyValue::Int(i64::from(v))
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Str(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Str(v)
    }
}

/// Ordered key mapping of a reference.
pub type ReferenceKey = BTreeMap<String, KeyValue>;

/// Build a [`ReferenceKey`] from `(field, value)` pairs.
///
/// ```
/// use dstate_types::key;
///
/// let k = key([("tenant", "acme")]);
/// assert_eq!(k["tenant"].as_str(), Some("acme"));
/// ```
pub fn key<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> ReferenceKey
where
    K: Into<String>,
    V: Into<KeyValue>,
{
    pairs
        .into_iter()
        .map(|(field, value)| (field.into(), value.into()))
        .collect()
}

/// Identity of one state-machine instance: its kind plus a key mapping.
///
/// Two references address the same entity iff kind and key are equal. The
/// key is ordered, so the order fields were supplied in does not matter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    kind: MachineKind,
    key: ReferenceKey,
}

impl Reference {
    /// Build a reference from a kind and `(field, value)` pairs.
    ///
    /// ```
    /// use dstate_types::Reference;
    ///
    /// let a = Reference::new("traffic_light", [("id", 1)]);
    /// let b = Reference::new("traffic_light", [("id", 1)]);
    /// assert_eq!(a, b);
    /// ```
    pub fn new<K, V>(kind: impl Into<MachineKind>, key: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<KeyValue>,
    {
        Self {
            kind: kind.into(),
            key: self::key(key),
        }
    }

    pub fn from_parts(kind: MachineKind, key: ReferenceKey) -> Self {
        Self { kind, key }
    }

    pub fn kind(&self) -> &MachineKind {
        &self.kind
    }

    pub fn key(&self) -> &ReferenceKey {
        &self.key
    }

    pub fn get(&self, field: &str) -> Option<&KeyValue> {
        self.key.get(field)
    }

    /// The conventional `id` field, if the key has one.
    pub fn id(&self) -> Option<&KeyValue> {
        self.get("id")
    }

    /// The key as a JSON object, used verbatim as a document filter.
    pub fn key_document(&self) -> serde_json::Map<String, Value> {
        self.key
            .iter()
            .map(|(field, value)| (field.clone(), value.to_json()))
            .collect()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.kind)?;
        for (i, (field, value)) in self.key.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{field}={value}")?;
        }
        write!(f, "}}")
    }
}

//! Loosely-typed attribute maps stored in a single encoded column.
//!
//! [`Attributes`] behaves like a plain map to its owner, but every in-place
//! insertion or removal is reported to the owner's [`DirtyFields`] so the next
//! save picks the column up even though the field itself was never reassigned.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::util::lock::mutex_lock;

const SOURCE: &str = "domain::attributes";

#[derive(Debug, Error)]
pub enum AttributesError {
    #[error("attributes must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },
    #[error("attributes could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("attributes could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Set of column names modified since the owner was loaded or last saved.
///
/// Clones share state: a record and the values it owns observe one set.
/// Use [`DirtyFields::detached`] for an independent copy.
#[derive(Clone, Default)]
pub struct DirtyFields(Arc<Mutex<BTreeSet<&'static str>>>);

impl DirtyFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, column: &'static str) {
        self.lock().insert(column);
    }

    pub fn contains(&self, column: &str) -> bool {
        self.lock().contains(column)
    }

    pub fn is_dirty(&self) -> bool {
        !self.lock().is_empty()
    }

    /// An independent set holding the same columns.
    pub fn detached(&self) -> Self {
        Self(Arc::new(Mutex::new(self.lock().clone())))
    }

    /// Drain the set, returning what was modified.
    pub fn take(&self) -> BTreeSet<&'static str> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<&'static str>> {
        mutex_lock(&self.0, SOURCE, "dirty_fields")
    }
}

impl fmt::Debug for DirtyFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.lock().iter()).finish()
    }
}

// Tracking state never takes part in record equality.
impl PartialEq for DirtyFields {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Ordered key/value map persisted as one JSON column.
#[derive(Clone, Default)]
pub struct Attributes {
    entries: Map<String, Value>,
    owner: Option<(DirtyFields, &'static str)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a decoded column value, rejecting anything but an object.
    pub fn coerce(value: Value) -> Result<Self, AttributesError> {
        match value {
            Value::Object(entries) => Ok(Self::from(entries)),
            Value::Null => Err(AttributesError::NotAnObject { found: "null" }),
            Value::Bool(_) => Err(AttributesError::NotAnObject { found: "bool" }),
            Value::Number(_) => Err(AttributesError::NotAnObject { found: "number" }),
            Value::String(_) => Err(AttributesError::NotAnObject { found: "string" }),
            Value::Array(_) => Err(AttributesError::NotAnObject { found: "array" }),
        }
    }

    /// Decode from the text column representation.
    pub fn decode(raw: &str) -> Result<Self, AttributesError> {
        let value: Value = serde_json::from_str(raw).map_err(AttributesError::Decode)?;
        Self::coerce(value)
    }

    /// Encode to the text column representation.
    pub fn encode(&self) -> Result<String, AttributesError> {
        serde_json::to_string(&self.entries).map_err(AttributesError::Encode)
    }

    /// Attach to the owning record's dirty set under `column`.
    pub fn bind(&mut self, owner: &DirtyFields, column: &'static str) {
        self.owner = Some((owner.clone(), column));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.entries
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let previous = self.entries.insert(key.into(), value.into());
        self.changed();
        previous
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.changed();
        }
        removed
    }

    pub fn clear(&mut self) {
        if !self.entries.is_empty() {
            self.entries.clear();
            self.changed();
        }
    }

    pub fn extend<I, K, V>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in entries {
            self.entries.insert(key.into(), value.into());
        }
        self.changed();
    }

    fn changed(&self) {
        if let Some((owner, column)) = &self.owner {
            owner.mark(column);
        }
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(entries: Map<String, Value>) -> Self {
        Self {
            entries,
            owner: None,
        }
    }
}

impl PartialEq for Attributes {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.entries.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::deserialize(deserializer).map(Self::from)
    }
}

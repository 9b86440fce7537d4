//! Record-type contract shared by the cache layer and the persistence adapters.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Static identity of a persisted record type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordDescriptor {
    /// Type name used in user-facing messages, e.g. `User`.
    pub name: &'static str,
    /// Backing table.
    pub table: &'static str,
    /// Ordered primary-key columns.
    pub primary_key: &'static [&'static str],
    /// Columns that equality filters may reference.
    pub columns: &'static [&'static str],
    /// Cache epoch; bumping it orphans every key of the type.
    pub version: Option<&'static str>,
}

impl RecordDescriptor {
    /// The primary-key column when the key is a single field.
    pub fn single_key(&self) -> Option<&'static str> {
        match self.primary_key {
            [column] => Some(*column),
            _ => None,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }
}

/// A record type that can be cached and looked up by primary key.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const DESCRIPTOR: RecordDescriptor;

    /// Primary-key values in descriptor order.
    fn record_id(&self) -> RecordId;
}

/// A scalar column value used in keys and equality filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldValue {
    Int(i64),
    Text(String),
    Bool(bool),
    Uuid(Uuid),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Text(value) => f.write_str(value),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Uuid(value) => write!(f, "{}", value.hyphenated()),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Uuid> for FieldValue {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

/// Primary-key values of one record, in descriptor order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordId(Vec<FieldValue>);

impl RecordId {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key suffix: values joined by `-`.
    pub fn suffix(&self) -> String {
        self.0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

impl From<FieldValue> for RecordId {
    fn from(value: FieldValue) -> Self {
        Self(vec![value])
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        Self(vec![value.into()])
    }
}

impl From<i32> for RecordId {
    fn from(value: i32) -> Self {
        Self(vec![value.into()])
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(vec![value.into()])
    }
}

impl From<Uuid> for RecordId {
    fn from(value: Uuid) -> Self {
        Self(vec![value.into()])
    }
}

impl From<(i64, i64)> for RecordId {
    fn from((a, b): (i64, i64)) -> Self {
        Self(vec![a.into(), b.into()])
    }
}

/// Equality filter over named columns.
///
/// Pairs are kept sorted by column name so equivalent filters render the
/// same cache key regardless of construction order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pairs: BTreeMap<String, FieldValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an equality condition.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.pairs.insert(column.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.pairs.iter().map(|(column, value)| (column.as_str(), value))
    }

    /// The only value when the filter has exactly one condition.
    pub fn single_value(&self) -> Option<&FieldValue> {
        match self.pairs.len() {
            1 => self.pairs.values().next(),
            _ => None,
        }
    }

    /// Key suffix: `column$value` pairs joined by `-`.
    pub fn suffix(&self) -> String {
        self.pairs
            .iter()
            .map(|(column, value)| format!("{column}${value}"))
            .collect::<Vec<_>>()
            .join("-")
    }
}

//! Cache key derivation.
//!
//! Every key has the shape `{namespace}:{category}:{table}[|{version}]:{suffix}`.
//! The optional version segment lets a record type drop all of its cached
//! entries for a category at once: old keys simply stop being read and age
//! out through their TTL.

use std::fmt;
use std::time::Duration;

use crate::domain::record::{FieldValue, Filter, RecordDescriptor, RecordId};

pub const DEFAULT_NAMESPACE: &str = "db";

const ONE_DAY: Duration = Duration::from_secs(86_400);
const FIVE_MINUTES: Duration = Duration::from_secs(300);

/// Operation category a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Single-record read-through by primary key.
    Get,
    /// Maintained row count per record type.
    Count,
    /// First record matching an equality filter.
    FilterFirst,
    /// Row count matching an equality filter.
    FilterCount,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Get,
        Category::Count,
        Category::FilterFirst,
        Category::FilterCount,
    ];

    pub const fn code(self) -> &'static str {
        match self {
            Category::Get => "get",
            Category::Count => "count",
            Category::FilterFirst => "ff",
            Category::FilterCount => "fc",
        }
    }

    /// Filter categories are never invalidated on write, so they live briefly.
    pub const fn default_ttl(self) -> Duration {
        match self {
            Category::Get | Category::Count => ONE_DAY,
            Category::FilterFirst | Category::FilterCount => FIVE_MINUTES,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Derives keys under one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `namespace:category:table:` or `namespace:category:table|version:`.
    pub fn prefix(&self, descriptor: &RecordDescriptor, category: Category) -> String {
        let mut prefix = format!("{}:{}:{}", self.namespace, category.code(), descriptor.table);
        if let Some(version) = descriptor.version {
            prefix.push('|');
            prefix.push_str(version);
        }
        prefix.push(':');
        prefix
    }

    pub fn identity(&self, descriptor: &RecordDescriptor, id: &RecordId) -> String {
        let mut key = self.prefix(descriptor, Category::Get);
        key.push_str(&id.suffix());
        key
    }

    /// Identity key from an already computed `get` prefix.
    pub fn identity_with_prefix(prefix: &str, id: &FieldValue) -> String {
        format!("{prefix}{id}")
    }

    /// The per-type counter key; it carries no suffix.
    pub fn counter(&self, descriptor: &RecordDescriptor) -> String {
        self.prefix(descriptor, Category::Count)
    }

    pub fn filtered(
        &self,
        descriptor: &RecordDescriptor,
        category: Category,
        filter: &Filter,
    ) -> String {
        let mut key = self.prefix(descriptor, category);
        key.push_str(&filter.suffix());
        key
    }
}

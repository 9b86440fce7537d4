//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::attributes::{Attributes, DirtyFields};
use crate::domain::record::{Record, RecordDescriptor, RecordId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub description: Option<String>,
    pub role: i16,
    pub reputation: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Record for UserRecord {
    const DESCRIPTOR: RecordDescriptor = RecordDescriptor {
        name: "User",
        table: "users",
        primary_key: &["id"],
        columns: &["id", "username", "email", "role", "reputation"],
        version: Some("1"),
    };

    fn record_id(&self) -> RecordId {
        self.id.into()
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "CafeData")]
pub struct CafeRecord {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub user_id: i64,
    pub status: i16,
    pub style: Attributes,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(skip)]
    dirty: DirtyFields,
}

impl CafeRecord {
    pub const STATUS_PUBLIC: i16 = 1;

    pub fn new(
        id: i64,
        slug: String,
        name: String,
        user_id: i64,
        status: i16,
        style: Attributes,
        created_at: OffsetDateTime,
    ) -> Self {
        let mut cafe = Self {
            id,
            slug,
            name,
            user_id,
            status,
            style,
            created_at,
            dirty: DirtyFields::new(),
        };
        cafe.style.bind(&cafe.dirty, "style");
        cafe
    }

    pub fn dirty_fields(&self) -> &DirtyFields {
        &self.dirty
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.dirty.mark("name");
    }
}

// A clone starts with a copy of the dirty set rather than sharing it.
impl Clone for CafeRecord {
    fn clone(&self) -> Self {
        let mut cafe = Self {
            id: self.id,
            slug: self.slug.clone(),
            name: self.name.clone(),
            user_id: self.user_id,
            status: self.status,
            style: self.style.clone(),
            created_at: self.created_at,
            dirty: self.dirty.detached(),
        };
        cafe.style.bind(&cafe.dirty, "style");
        cafe
    }
}

#[derive(Deserialize)]
struct CafeData {
    id: i64,
    slug: String,
    name: String,
    user_id: i64,
    status: i16,
    style: Attributes,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl From<CafeData> for CafeRecord {
    fn from(data: CafeData) -> Self {
        Self::new(
            data.id,
            data.slug,
            data.name,
            data.user_id,
            data.status,
            data.style,
            data.created_at,
        )
    }
}

impl Record for CafeRecord {
    const DESCRIPTOR: RecordDescriptor = RecordDescriptor {
        name: "Cafe",
        table: "cafes",
        primary_key: &["id"],
        columns: &["id", "slug", "user_id", "status"],
        version: None,
    };

    fn record_id(&self) -> RecordId {
        self.id.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CafeMemberRecord {
    pub cafe_id: i64,
    pub user_id: i64,
    pub role: i16,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Record for CafeMemberRecord {
    const DESCRIPTOR: RecordDescriptor = RecordDescriptor {
        name: "CafeMember",
        table: "cafe_members",
        primary_key: &["cafe_id", "user_id"],
        columns: &["cafe_id", "user_id", "role"],
        version: None,
    };

    fn record_id(&self) -> RecordId {
        (self.cafe_id, self.user_id).into()
    }
}

#![allow(dead_code)]

use std::sync::Arc;

use tavern::application::cafes::CafeService;
use tavern::application::users::UserService;
use tavern::cache::{CacheConfig, CacheLayer, MemoryBackend};
use tavern::domain::attributes::Attributes;
use tavern::domain::entities::{CafeMemberRecord, CafeRecord, UserRecord};
use tavern::infra::http::AppState;
use tavern::infra::memory::InMemoryStore;
use time::macros::datetime;

pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub layer: CacheLayer,
    pub users: Arc<InMemoryStore<UserRecord>>,
    pub cafes: Arc<InMemoryStore<CafeRecord>>,
    pub members: Arc<InMemoryStore<CafeMemberRecord>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let backend = Arc::new(MemoryBackend::from_config(&config));
        let layer = CacheLayer::new(backend.clone(), config);
        let users = Arc::new(InMemoryStore::<UserRecord>::new());
        let cafes = Arc::new(InMemoryStore::<CafeRecord>::new());
        let members = Arc::new(InMemoryStore::<CafeMemberRecord>::new());
        users.subscribe(Arc::new(layer.hooks()));
        cafes.subscribe(Arc::new(layer.hooks()));
        members.subscribe(Arc::new(layer.hooks()));
        Self {
            backend,
            layer,
            users,
            cafes,
            members,
        }
    }

    pub fn user_service(&self) -> UserService {
        UserService::new(
            self.layer.query::<UserRecord>(self.users.clone()),
            self.users.clone(),
        )
    }

    pub fn cafe_service(&self) -> CafeService {
        CafeService::new(
            self.layer.query::<CafeRecord>(self.cafes.clone()),
            self.layer.query::<UserRecord>(self.users.clone()),
            self.layer.query::<CafeMemberRecord>(self.members.clone()),
            self.cafes.clone(),
        )
    }

    pub fn state(&self) -> AppState {
        AppState {
            users: self.user_service(),
            cafes: self.cafe_service(),
            database: None,
        }
    }
}

pub fn user(id: i64, username: &str) -> UserRecord {
    UserRecord {
        id,
        username: username.to_string(),
        email: format!("{username}@example.com"),
        description: None,
        role: 0,
        reputation: 0,
        created_at: datetime!(2024-01-01 00:00 UTC),
    }
}

pub fn cafe(id: i64, slug: &str, owner: i64) -> CafeRecord {
    CafeRecord::new(
        id,
        slug.to_string(),
        slug.to_uppercase(),
        owner,
        CafeRecord::STATUS_PUBLIC,
        Attributes::new(),
        datetime!(2024-01-01 00:00 UTC),
    )
}

pub fn member(cafe_id: i64, user_id: i64) -> CafeMemberRecord {
    CafeMemberRecord {
        cafe_id,
        user_id,
        role: 0,
        created_at: datetime!(2024-01-01 00:00 UTC),
    }
}

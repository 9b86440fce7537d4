//! Postgres adapter tests.
//!
//! - Need a reachable server via `DATABASE_URL`; run with `cargo test -- --ignored`.
//! - Each test gets a fresh database with `./migrations` applied.

use std::sync::Arc;

use serde_json::json;
use sqlx::PgPool;

use tavern::application::repos::{
    CafesWriteRepo, CreateCafeParams, CreateUserParams, RecordStore, RepoError, UsersWriteRepo,
};
use tavern::cache::{CacheConfig, CacheLayer, MemoryBackend};
use tavern::domain::attributes::Attributes;
use tavern::domain::entities::{CafeMemberRecord, CafeRecord, UserRecord};
use tavern::domain::record::{Filter, RecordId};
use tavern::infra::db::PostgresRepositories;

fn setup(pool: PgPool) -> (Arc<MemoryBackend>, CacheLayer, PostgresRepositories) {
    let backend = Arc::new(MemoryBackend::new());
    let layer = CacheLayer::new(backend.clone(), CacheConfig::default());
    let repos = PostgresRepositories::new(pool, layer.hooks());
    (backend, layer, repos)
}

fn new_user(username: &str) -> CreateUserParams {
    CreateUserParams {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        description: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn reads_go_through_the_cache(pool: PgPool) {
    let (backend, layer, repos) = setup(pool);
    let alice = repos.create_user(new_user("alice")).await.expect("create");
    repos.create_user(new_user("bob")).await.expect("create");

    let query = layer.query::<UserRecord>(Arc::new(repos.store::<UserRecord>()));
    assert_eq!(query.count().await.expect("count"), 2);

    let found = query.get(alice.id).await.expect("get").expect("present");
    assert_eq!(found.username, "alice");
    assert!(backend.contains(&format!("db:get:users|1:{}", alice.id)));

    let by_name = query
        .filter_first(&Filter::new().eq("username", "bob"))
        .await
        .expect("filter")
        .expect("present");
    assert_eq!(by_name.email, "bob@example.com");
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn failed_inserts_do_not_touch_the_counter(pool: PgPool) {
    let (backend, _layer, repos) = setup(pool);
    repos.create_user(new_user("alice")).await.expect("create");

    let err = repos
        .create_user(new_user("alice"))
        .await
        .expect_err("duplicate");
    assert!(matches!(err, RepoError::Duplicate { .. }));
    assert_eq!(backend.stats().increments, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn cafe_style_round_trips_through_jsonb(pool: PgPool) {
    let (_backend, layer, repos) = setup(pool);
    let owner = repos.create_user(new_user("alice")).await.expect("owner");
    let mut style = Attributes::new();
    style.insert("color", "teal");
    let created = repos
        .create_cafe(CreateCafeParams {
            slug: "rustaceans".to_string(),
            name: "Rustaceans".to_string(),
            user_id: owner.id,
            status: CafeRecord::STATUS_PUBLIC,
            style,
        })
        .await
        .expect("create cafe");

    let query = layer.query::<CafeRecord>(Arc::new(repos.store::<CafeRecord>()));
    let mut cafe = query.get(created.id).await.expect("get").expect("present");
    cafe.style.insert("logo", json!("/logo.png"));
    assert!(repos.save_cafe(&cafe).await.expect("save"));
    assert!(!repos.save_cafe(&cafe).await.expect("clean save"));

    let store = repos.store::<CafeRecord>();
    let stored = store
        .fetch(&RecordId::from(created.id))
        .await
        .expect("fetch")
        .expect("present");
    assert_eq!(stored.style.get("color"), Some(&json!("teal")));
    assert_eq!(stored.style.get("logo"), Some(&json!("/logo.png")));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn composite_keys_are_fetched_by_both_columns(pool: PgPool) {
    let (_backend, layer, repos) = setup(pool.clone());
    let owner = repos.create_user(new_user("alice")).await.expect("owner");
    let guest = repos.create_user(new_user("bob")).await.expect("guest");
    let cafe = repos
        .create_cafe(CreateCafeParams {
            slug: "rustaceans".to_string(),
            name: "Rustaceans".to_string(),
            user_id: owner.id,
            status: CafeRecord::STATUS_PUBLIC,
            style: Attributes::new(),
        })
        .await
        .expect("cafe");
    sqlx::query("INSERT INTO cafe_members (cafe_id, user_id, role) VALUES ($1, $2, 1)")
        .bind(cafe.id)
        .bind(guest.id)
        .execute(&pool)
        .await
        .expect("member");

    let query = layer.query::<CafeMemberRecord>(Arc::new(repos.store::<CafeMemberRecord>()));
    let found = query
        .get((cafe.id, guest.id))
        .await
        .expect("get")
        .expect("present");
    assert_eq!(found.role, 1);
    assert!(query.get((cafe.id, owner.id)).await.expect("get").is_none());
}

mod common;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use tavern::application::repos::{CreateUserParams, UsersWriteRepo};
use tavern::domain::entities::UserRecord;
use tavern::domain::record::Filter;

use common::{Fixture, user};

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let fx = Fixture::new();
    fx.users.seed([user(1, "alice"), user(2, "bob")]);
    let query = fx.layer.query::<UserRecord>(fx.users.clone());

    // get: miss then hit
    query.get(1_i64).await.expect("miss");
    query.get(1_i64).await.expect("hit");
    query.get_dict([1_i64, 2, 3]).await.expect("batch");
    query
        .filter_first(&Filter::new().eq("username", "bob"))
        .await
        .expect("ff");
    query
        .filter_count(&Filter::new().eq("role", 0))
        .await
        .expect("fc");
    query.count().await.expect("count");

    // Poison the counter so the insert hook fails and is counted.
    fx.layer
        .backend()
        .set("db:count:users|1:", "\"x\"".to_string(), Duration::from_secs(60))
        .await
        .expect("poison counter");
    fx.users
        .create_user(CreateUserParams {
            username: "carol".to_string(),
            email: "carol@example.com".to_string(),
            description: None,
        })
        .await
        .expect("write succeeds despite hook failure");

    let snapshot = snapshotter.snapshot().into_vec();
    let names: HashSet<String> = snapshot
        .iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "tavern_cache_hit_total",
        "tavern_cache_miss_total",
        "tavern_cache_backfill_total",
        "tavern_cache_hook_failure_total",
        "tavern_store_query_ms",
    ];
    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }

    let mut hits_by_category: HashMap<String, u64> = HashMap::new();
    for (composite_key, _, _, value) in &snapshot {
        let key = composite_key.key();
        if key.name() != "tavern_cache_hit_total" {
            continue;
        }
        let Some(category) = key.labels().find(|label| label.key() == "category") else {
            continue;
        };
        if let DebugValue::Counter(count) = value {
            hits_by_category.insert(category.value().to_string(), *count);
        }
    }
    // The second single lookup plus id 1 inside the batch.
    assert_eq!(hits_by_category.get("get"), Some(&2));
}

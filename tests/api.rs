mod common;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use tavern::infra::http::build_router;

use common::{Fixture, cafe, member, user};

fn router(fx: &Fixture) -> Router {
    build_router(fx.state())
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.oneshot(request).await.expect("router responds");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes()
        .to_vec();
    (status, body)
}

fn get_json(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .expect("request builds")
}

fn with_json(method: Method, uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::ACCEPT, "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request builds")
}

fn parse(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

#[tokio::test]
async fn profile_lookup_uses_the_cache() {
    let fx = Fixture::new();
    fx.users.seed([user(1, "alice")]);

    let (status, body) = send(router(&fx), get_json("/api/users/alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["email"], "alice@example.com");

    let (status, _) = send(router(&fx), get_json("/api/users/alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fx.users.stats().first_matching, 1);
}

#[tokio::test]
async fn structured_clients_get_a_not_found_body() {
    let fx = Fixture::new();

    let (status, body) = send(router(&fx), get_json("/api/users/alice")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let body = parse(&body);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["error"]["message"], "User \"alice\" not found");
}

#[tokio::test]
async fn plain_clients_get_a_bare_404() {
    let fx = Fixture::new();
    let request = Request::builder()
        .uri("/api/users/id/7")
        .header(header::ACCEPT, "text/html")
        .body(Body::empty())
        .expect("request builds");

    let (status, body) = send(router(&fx), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.is_empty());
}

#[tokio::test]
async fn users_are_created_counted_and_deleted() {
    let fx = Fixture::new();

    let (status, body) = send(
        router(&fx),
        with_json(
            Method::POST,
            "/api/users",
            json!({"username": "alice", "email": "alice@example.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = parse(&body)["id"].as_i64().expect("id");

    let (status, body) = send(router(&fx), get_json("/api/users/count")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["count"], 1);

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/users/id/{id}"))
        .body(Body::empty())
        .expect("request builds");
    let (status, _) = send(router(&fx), request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(router(&fx), get_json("/api/users/count")).await;
    assert_eq!(parse(&body)["count"], 0);
}

#[tokio::test]
async fn invalid_usernames_are_rejected() {
    let fx = Fixture::new();
    let (status, body) = send(
        router(&fx),
        with_json(
            Method::POST,
            "/api/users",
            json!({"username": "", "email": "nobody@example.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse(&body)["error"]["code"], "invalid_input");
}

#[tokio::test]
async fn route_segment_usernames_are_reserved() {
    let fx = Fixture::new();
    let (status, body) = send(
        router(&fx),
        with_json(
            Method::POST,
            "/api/users",
            json!({"username": "count", "email": "count@example.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse(&body)["error"]["code"], "invalid_input");
    assert_eq!(fx.users.len(), 0);
}

#[tokio::test]
async fn duplicate_usernames_conflict() {
    let fx = Fixture::new();
    let payload = json!({"username": "alice", "email": "alice@example.com"});
    send(router(&fx), with_json(Method::POST, "/api/users", payload.clone())).await;

    let (status, body) = send(router(&fx), with_json(Method::POST, "/api/users", payload)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse(&body)["error"]["code"], "duplicate");
}

#[tokio::test]
async fn patched_users_are_visible_immediately() {
    let fx = Fixture::new();
    fx.users.seed([user(1, "alice")]);
    send(router(&fx), get_json("/api/users/id/1")).await;

    let (status, _) = send(
        router(&fx),
        with_json(
            Method::PATCH,
            "/api/users/id/1",
            json!({"email": "alice@tavern.test"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(router(&fx), get_json("/api/users/id/1")).await;
    assert_eq!(parse(&body)["email"], "alice@tavern.test");
    assert_eq!(fx.users.stats().fetches, 1);
}

#[tokio::test]
async fn cafes_list_in_request_order_with_owners() {
    let fx = Fixture::new();
    fx.users.seed([user(1, "alice"), user(2, "bob")]);
    fx.cafes
        .seed([cafe(10, "rustaceans", 1), cafe(11, "gophers", 2)]);

    let (status, body) = send(router(&fx), get_json("/api/cafes?ids=11,12,10")).await;
    assert_eq!(status, StatusCode::OK);
    let body = parse(&body);
    let entries = body.as_array().expect("array");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["slug"], "gophers");
    assert_eq!(entries[0]["owner"]["username"], "bob");
    assert_eq!(entries[1]["slug"], "rustaceans");
}

#[tokio::test]
async fn malformed_id_lists_are_bad_requests() {
    let fx = Fixture::new();
    let (status, _) = send(router(&fx), get_json("/api/cafes?ids=1,two")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn style_keys_are_set_and_removed() {
    let fx = Fixture::new();
    fx.cafes.seed([cafe(10, "rustaceans", 1)]);

    let (status, body) = send(
        router(&fx),
        with_json(Method::PUT, "/api/cafes/id/10/style/color", json!("teal")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["style"]["color"], "teal");

    let (_, body) = send(router(&fx), get_json("/api/cafes/rustaceans")).await;
    assert_eq!(parse(&body)["style"]["color"], "teal");

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/api/cafes/id/10/style/color")
        .header(header::ACCEPT, "application/json")
        .body(Body::empty())
        .expect("request builds");
    let (status, body) = send(router(&fx), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["style"], json!({}));
}

#[tokio::test]
async fn members_are_looked_up_by_composite_key() {
    let fx = Fixture::new();
    fx.members.seed([member(10, 2)]);

    let (status, body) = send(router(&fx), get_json("/api/cafes/id/10/members/2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["user_id"], 2);

    let (status, body) = send(router(&fx), get_json("/api/cafes/id/10/members/3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        parse(&body)["error"]["message"],
        "CafeMember \"10-3\" not found"
    );
}

#[tokio::test]
async fn health_check_without_a_database_is_ok() {
    let fx = Fixture::new();
    let (status, _) = send(router(&fx), get_json("/_health/db")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

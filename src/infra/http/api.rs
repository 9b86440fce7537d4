//! JSON API over the user and cafe services.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, header::ACCEPT, request::Parts},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::repos::{CreateCafeParams, CreateUserParams, UpdateUserParams};
use crate::cache::ResponseFormat;
use crate::domain::attributes::Attributes;
use crate::domain::entities::CafeRecord;

use super::AppState;
use super::error::ApiError;
use super::middleware::{log_responses, set_request_context};

/// Response format negotiated from the `Accept` header.
#[derive(Debug, Clone, Copy)]
pub struct Negotiated(pub ResponseFormat);

impl<S: Send + Sync> FromRequestParts<S> for Negotiated {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let structured = parts
            .headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.contains("application/json"));
        Ok(Self(if structured {
            ResponseFormat::Structured
        } else {
            ResponseFormat::Plain
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCafeRequest {
    pub slug: String,
    pub name: String,
    pub user_id: i64,
    #[serde(default)]
    pub status: Option<i16>,
    #[serde(default)]
    pub style: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct CafeIdsQuery {
    pub ids: String,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users", post(create_user))
        .route("/api/users/count", get(count_users))
        .route("/api/users/{username}", get(get_user))
        .route(
            "/api/users/id/{id}",
            get(get_user_by_id).patch(update_user).delete(delete_user),
        )
        .route("/api/cafes", get(list_cafes).post(create_cafe))
        .route("/api/cafes/{slug}", get(get_cafe))
        .route("/api/cafes/id/{id}", axum::routing::delete(delete_cafe))
        .route(
            "/api/cafes/id/{id}/style/{key}",
            put(set_cafe_style).delete(remove_cafe_style),
        )
        .route(
            "/api/cafes/id/{id}/members/{user_id}",
            get(get_cafe_member),
        )
        .route("/_health/db", get(db_health))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

pub async fn count_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let count = state.users.count().await?;
    Ok(Json(CountResponse { count }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Negotiated(format): Negotiated,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.users.profile(&username, format).await?))
}

pub async fn get_user_by_id(
    State(state): State<AppState>,
    Negotiated(format): Negotiated,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.users.by_id(id, format).await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .users
        .create(CreateUserParams {
            username: payload.username,
            email: payload.email,
            description: payload.description,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .users
        .update(UpdateUserParams {
            id,
            email: payload.email,
            description: payload.description,
        })
        .await?;
    Ok(Json(user))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.users.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_ids(raw: &str) -> Result<Vec<i64>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|err| {
                ApiError::bad_request("invalid cafe id", Some(format!("`{part}`: {err}")))
            })
        })
        .collect()
}

pub async fn list_cafes(
    State(state): State<AppState>,
    Query(query): Query<CafeIdsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = parse_ids(&query.ids)?;
    Ok(Json(state.cafes.with_owners(&ids).await?))
}

pub async fn get_cafe(
    State(state): State<AppState>,
    Negotiated(format): Negotiated,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cafes.by_slug(&slug, format).await?))
}

pub async fn create_cafe(
    State(state): State<AppState>,
    Json(payload): Json<CreateCafeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let style = match payload.style {
        Some(value) => Attributes::coerce(value)
            .map_err(|err| ApiError::bad_request("invalid style", Some(err.to_string())))?,
        None => Attributes::new(),
    };
    let cafe = state
        .cafes
        .create(CreateCafeParams {
            slug: payload.slug,
            name: payload.name,
            user_id: payload.user_id,
            status: payload.status.unwrap_or(CafeRecord::STATUS_PUBLIC),
            style,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(cafe)))
}

pub async fn delete_cafe(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.cafes.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_cafe_style(
    State(state): State<AppState>,
    Negotiated(format): Negotiated,
    Path((id, key)): Path<(i64, String)>,
    Json(value): Json<Value>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cafes.set_style(id, &key, value, format).await?))
}

pub async fn remove_cafe_style(
    State(state): State<AppState>,
    Negotiated(format): Negotiated,
    Path((id, key)): Path<(i64, String)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cafes.remove_style(id, &key, format).await?))
}

pub async fn get_cafe_member(
    State(state): State<AppState>,
    Negotiated(format): Negotiated,
    Path((id, user_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.cafes.member(id, user_id, format).await?))
}

pub async fn db_health(State(state): State<AppState>) -> impl IntoResponse {
    match &state.database {
        Some(repositories) => super::db_health_response(repositories.health_check().await),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_parsed_in_order() {
        assert_eq!(parse_ids("3, 1,2,").expect("ids"), vec![3, 1, 2]);
    }

    #[test]
    fn bad_ids_are_rejected() {
        let err = parse_ids("1,x").expect_err("invalid");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}

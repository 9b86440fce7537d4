pub mod api;
pub mod error;
mod middleware;

pub use api::build_api_router as build_router;
pub use error::{ApiError, query_to_api, repo_to_api};

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sqlx::Error as SqlxError;

use crate::application::cafes::CafeService;
use crate::application::error::ErrorReport;
use crate::application::users::UserService;
use crate::infra::db::PostgresRepositories;

#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub cafes: CafeService,
    /// Absent when running on the in-process store.
    pub database: Option<Arc<PostgresRepositories>>,
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

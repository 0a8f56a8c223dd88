//! HTTP API endpoints.

pub mod error;
pub mod extract;
pub mod health;
pub mod jobs;
pub mod registry;

pub use error::{ApiError, ErrorBody};

use axum::{
    http::{Method, Uri},
    Router,
};

use crate::AppState;

/// Create the API router.
///
/// Unknown routes and unsupported methods answer with an [`ErrorBody`]
/// like every other failure.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(registry::router())
        .fallback(no_route)
        .method_not_allowed_fallback(wrong_method)
}

async fn no_route(method: Method, uri: Uri) -> ApiError {
    ApiError::no_route(&method, uri.path())
}

async fn wrong_method(method: Method, uri: Uri) -> ApiError {
    ApiError::method_not_allowed(&method, uri.path())
}

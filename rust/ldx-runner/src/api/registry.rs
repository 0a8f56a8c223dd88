//! Job registry endpoints.

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::extract::{ApiQuery, IdPath};
use super::ApiError;
use crate::registry::{JobDefinition, JobFilter};
use crate::AppState;

/// Create the registry router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/registry", get(list_registry))
        .route("/registry/{id}", get(get_entry).delete(unregister))
}

/// Registry listing query.
#[derive(Debug, Deserialize)]
pub struct RegistryQuery {
    /// `all`, `scheduled` or `on_demand`.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Registry listing.
#[derive(Debug, Serialize)]
pub struct RegistryListResponse {
    /// Matching jobs.
    pub jobs: Vec<JobDefinition>,
    /// How many.
    pub count: usize,
    /// Filter applied.
    pub filter: JobFilter,
}

/// Unregister result.
#[derive(Debug, Serialize)]
pub struct UnregisterResponse {
    /// Removed job.
    pub job_id: String,
    /// Always `unregistered`.
    pub status: &'static str,
}

/// `GET /registry?type=`
async fn list_registry(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RegistryQuery>,
) -> Result<Json<RegistryListResponse>, ApiError> {
    let filter = match query.kind.as_deref() {
        Some(kind) => kind.parse::<JobFilter>().map_err(ApiError::bad_request)?,
        None => JobFilter::All,
    };
    let jobs = state.registry.list(filter);
    Ok(Json(RegistryListResponse {
        count: jobs.len(),
        jobs,
        filter,
    }))
}

/// `GET /registry/{id}`
async fn get_entry(
    State(state): State<AppState>,
    IdPath(job_id): IdPath,
) -> Result<Json<JobDefinition>, ApiError> {
    state
        .registry
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&job_id))
}

/// Remove a job and its trigger.
///
/// `DELETE /registry/{id}`
async fn unregister(
    State(state): State<AppState>,
    IdPath(job_id): IdPath,
) -> Result<Json<UnregisterResponse>, ApiError> {
    state.scheduler.unregister(&job_id).await?;
    Ok(Json(UnregisterResponse {
        job_id,
        status: "unregistered",
    }))
}

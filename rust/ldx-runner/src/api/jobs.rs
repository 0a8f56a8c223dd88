//! Job registration, triggering and execution tracking.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use super::extract::{ApiJson, IdPath};
use super::ApiError;
use crate::config::ResolvedConfig;
use crate::scheduler::{
    Cancelled, ExecutionContext, ExecutionStatus, ScheduleSpec, ScheduleSummary,
};
use crate::AppState;

/// Source recorded for jobs registered over HTTP.
const API_SOURCE: &str = "api";

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(register_job).get(list_jobs))
        .route("/jobs/active", get(list_active))
        .route("/jobs/{id}", get(get_job).delete(cancel_job))
        .route("/jobs/{id}/remove", post(remove_execution))
        .route("/jobs/{id}/trigger", post(trigger_job))
}

/// Request to register a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterJobRequest {
    /// Job id.
    pub job_id: String,
    /// Plugin sections. May carry a `schedule` section.
    pub config: serde_json::Value,
    /// Trigger; takes precedence over a `schedule` section in `config`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<serde_json::Value>,
    /// Overwrite an existing job with the same id.
    #[serde(default)]
    pub replace_existing: bool,
}

/// Registration result.
#[derive(Debug, Serialize)]
pub struct RegisterJobResponse {
    /// Registered job.
    pub job_id: String,
    /// `scheduled` or `registered`.
    pub status: &'static str,
    /// Whether the job only runs when triggered.
    pub on_demand: bool,
    /// Installed trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleSpec>,
    /// First firing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Local>>,
    /// How to run an on-demand job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// One execution in a listing.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    /// Execution id.
    pub execution_id: String,
    /// Job that fired.
    pub job_id: String,
    /// Status.
    pub status: ExecutionStatus,
    /// When a worker picked it up.
    pub start_time: Option<DateTime<Utc>>,
    /// When it ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Run time.
    pub duration_ms: Option<i64>,
    /// Failure description.
    pub error: Option<String>,
}

impl From<ExecutionContext> for ExecutionSummary {
    fn from(ctx: ExecutionContext) -> Self {
        Self {
            duration_ms: ctx.duration_ms(),
            execution_id: ctx.execution_id,
            job_id: ctx.job_id,
            status: ctx.status,
            start_time: ctx.start_time,
            end_time: ctx.end_time,
            error: ctx.error,
        }
    }
}

/// Execution and schedule listing.
#[derive(Debug, Serialize)]
pub struct JobListResponse {
    /// Tracked executions.
    pub jobs: Vec<ExecutionSummary>,
    /// Installed triggers.
    pub scheduled: Vec<ScheduleSummary>,
    /// Number of tracked executions.
    pub count: usize,
}

/// Running executions.
#[derive(Debug, Serialize)]
pub struct ActiveJobsResponse {
    /// Running executions.
    pub jobs: Vec<ExecutionSummary>,
    /// How many.
    pub count: usize,
}

/// An execution or, failing that, a scheduled job.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JobView {
    /// Full execution state.
    Execution(ExecutionContext),
    /// Installed trigger.
    Schedule(ScheduleSummary),
}

/// Trigger result.
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    /// Job that fired.
    pub job_id: String,
    /// New execution.
    pub execution_id: String,
    /// Always `triggered`.
    pub status: &'static str,
    /// Where to follow the run.
    pub message: String,
}

/// Cancel or remove result.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// Job or execution id.
    pub id: String,
    /// `cancelled` or `removed`.
    pub status: &'static str,
}

/// Register a job.
///
/// `POST /jobs`
async fn register_job(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.job_id.trim().is_empty() {
        return Err(ApiError::bad_request("job_id must not be empty"));
    }
    let sections = ResolvedConfig::from_value(req.config)?.into_inner();
    let mut config = state.resolver.resolve(sections, None)?;
    let embedded = config.take_schedule()?;
    let schedule = match req.schedule {
        Some(section) => Some(ScheduleSpec::from_section(&section)?),
        None => embedded,
    };

    let registration = state
        .scheduler
        .register_job(&req.job_id, config, schedule, API_SOURCE, req.replace_existing)
        .await?;

    let on_demand = !registration.is_scheduled();
    let response = RegisterJobResponse {
        status: if on_demand { "registered" } else { "scheduled" },
        on_demand,
        hint: on_demand.then(|| format!("Trigger with POST /jobs/{}/trigger", registration.job_id)),
        job_id: registration.job_id,
        schedule: registration.schedule,
        next_run: registration.next_run,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// List tracked executions and installed triggers.
///
/// `GET /jobs`
async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs: Vec<ExecutionSummary> = state
        .scheduler
        .executions()
        .into_iter()
        .map(ExecutionSummary::from)
        .collect();
    Json(JobListResponse {
        count: jobs.len(),
        jobs,
        scheduled: state.scheduler.schedules(),
    })
}

/// List running executions.
///
/// `GET /jobs/active`
async fn list_active(State(state): State<AppState>) -> Json<ActiveJobsResponse> {
    let jobs: Vec<ExecutionSummary> = state
        .scheduler
        .active()
        .into_iter()
        .map(ExecutionSummary::from)
        .collect();
    Json(ActiveJobsResponse {
        count: jobs.len(),
        jobs,
    })
}

/// Execution state, or the schedule of a job with that id.
///
/// `GET /jobs/{id}`
async fn get_job(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Json<JobView>, ApiError> {
    state
        .scheduler
        .execution(&id)
        .map(JobView::Execution)
        .or_else(|| state.scheduler.schedule(&id).map(JobView::Schedule))
        .map(Json)
        .ok_or_else(|| ApiError::not_found(&id))
}

/// Cancel a schedule or drop a finished execution.
///
/// `DELETE /jobs/{id}`
async fn cancel_job(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Json<CancelResponse>, ApiError> {
    let status = match state.scheduler.cancel(&id)? {
        Cancelled::Schedule => "cancelled",
        Cancelled::Execution => "removed",
    };
    Ok(Json(CancelResponse { id, status }))
}

/// Drop a finished execution.
///
/// `POST /jobs/{id}/remove`
async fn remove_execution(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> Result<Json<CancelResponse>, ApiError> {
    state.scheduler.remove_execution(&id)?;
    Ok(Json(CancelResponse {
        id,
        status: "removed",
    }))
}

/// Run a registered job now.
///
/// `POST /jobs/{id}/trigger`
async fn trigger_job(
    State(state): State<AppState>,
    IdPath(job_id): IdPath,
) -> Result<Json<TriggerResponse>, ApiError> {
    let execution_id = state.scheduler.trigger_job(&job_id).await?;
    Ok(Json(TriggerResponse {
        message: format!("Follow the run with GET /jobs/{execution_id}"),
        job_id,
        execution_id,
        status: "triggered",
    }))
}

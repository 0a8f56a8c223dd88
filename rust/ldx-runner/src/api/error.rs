//! Error responses.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::registry::RegistryError;
use crate::scheduler::SchedulerError;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error kind.
    pub error: String,
    /// What went wrong.
    pub message: String,
    /// What the caller can do about it.
    pub hint: String,
}

/// API error with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, kind: &str, message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                error: kind.to_string(),
                message: message.into(),
                hint: hint.into(),
            },
        }
    }

    /// Malformed request.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "bad_request",
            message,
            "Check the request parameters.",
        )
    }

    /// Nothing with this id.
    pub fn not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "unknown_job",
            format!("no job or execution named '{id}'"),
            "List jobs with GET /jobs or GET /registry.",
        )
    }

    /// No route for this method and path.
    pub fn no_route(method: &Method, path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no route for {method} {path}"),
            "Routes are /health, /jobs and /registry.",
        )
    }

    /// Path exists but not for this method.
    pub fn method_not_allowed(method: &Method, path: &str) -> Self {
        Self::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            format!("{method} is not supported on {path}"),
            "Check the HTTP method for this route.",
        )
    }

    /// HTTP status of this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Error kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.body.error
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let hint = match &rejection {
            JsonRejection::MissingJsonContentType(_) => "Send the body with Content-Type: application/json.",
            JsonRejection::JsonSyntaxError(_) => "Send a well-formed JSON document.",
            JsonRejection::JsonDataError(_) => "Include job_id and config with the expected types.",
            _ => "Send a JSON request body.",
        };
        Self::new(rejection.status(), "invalid_body", rejection.body_text(), hint)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            rejection.status(),
            "bad_request",
            rejection.body_text(),
            "Check the query parameters.",
        )
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::new(
            rejection.status(),
            "bad_request",
            rejection.body_text(),
            "Check the id in the URL.",
        )
    }
}

impl From<ConfigError> for ApiError {
    fn from(error: ConfigError) -> Self {
        let hint = match &error {
            ConfigError::MissingTemplate { .. } => "Add the template to the config directory or fix its name.",
            ConfigError::TemplateCycle { .. } => "Remove the circular template reference.",
            ConfigError::NoPlugins => "Add at least one section naming a registered plugin.",
            ConfigError::InvalidSchedule(_) => {
                "Use trigger = \"cron\" with an hour, or trigger = \"interval\" with seconds > 0."
            }
            _ => "Fix the job configuration and retry.",
        };
        Self::new(StatusCode::BAD_REQUEST, error.kind(), error.to_string(), hint)
    }
}

impl From<SchedulerError> for ApiError {
    fn from(error: SchedulerError) -> Self {
        let message = error.to_string();
        match error {
            SchedulerError::ScheduleConflict { existing, .. } => Self::new(
                StatusCode::CONFLICT,
                "schedule_conflict",
                message,
                format!("Pick a different schedule, or replace or cancel job '{existing}'."),
            ),
            SchedulerError::DuplicateJob(_) => Self::new(
                StatusCode::CONFLICT,
                "duplicate_job",
                message,
                "Set replace_existing to true to overwrite the job.",
            ),
            SchedulerError::UnknownJob(id) => Self::not_found(&id),
            SchedulerError::InvalidState(_) => Self::new(
                StatusCode::BAD_REQUEST,
                "invalid_state",
                message,
                "Running executions cannot be interrupted; retry once they finish.",
            ),
            SchedulerError::Config(e) | SchedulerError::Engine(EngineError::Config(e)) => e.into(),
            SchedulerError::Engine(EngineError::Plugin(_)) => Self::new(
                StatusCode::BAD_REQUEST,
                "plugin_error",
                message,
                "Check the plugin section names against the registered plugins.",
            ),
            SchedulerError::Engine(EngineError::ParseConfig { env_key, .. }) => Self::new(
                StatusCode::BAD_REQUEST,
                "validation_error",
                message,
                format!("Fix the fields of section '{env_key}'."),
            ),
            SchedulerError::Registry(e) => e.into(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::DuplicateJob(id) => SchedulerError::DuplicateJob(id).into(),
            RegistryError::UnknownJob(id) => Self::not_found(&id),
            other => {
                tracing::error!(error = %other, "Registry persistence failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "registry_io",
                    other.to_string(),
                    "Check that the registry file is writable; the change is kept in memory.",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

//! HTTP client for a running scheduler server.
//!
//! Wraps the REST surface served by [`crate::server`] using [`reqwest`].
//! Successful responses come back as JSON values; error responses are
//! decoded from the server's `{error, message, hint}` body.
//!
//! ```rust,ignore
//! use ldx_runner::client::{load_job_file, SchedulerClient};
//!
//! let client = SchedulerClient::new("http://127.0.0.1:5000");
//! let request = load_job_file(Path::new("nightly.toml"), None, false)?;
//! client.register(&request).await?;
//! let run = client.trigger("nightly").await?;
//! ```

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::api::jobs::RegisterJobRequest;
use crate::config::source::read_table;
use crate::config::ConfigError;
use crate::registry::JobFilter;

/// Address used when no server is given.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

/// Errors from the client layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP request itself failed (connection refused, timeout, ...).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-2xx status.
    #[error("server error ({status}) {kind}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error kind.
        kind: String,
        /// Server message.
        message: String,
        /// Server hint, when present.
        hint: Option<String>,
    },

    /// The job file could not be read.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Hint from the server, if any.
    #[must_use]
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Api { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

/// Build a registration request from a TOML job file.
///
/// The job id defaults to the file stem. The file is sent as written;
/// templates and a `schedule` section are resolved by the server.
pub fn load_job_file(
    path: &Path,
    job_id: Option<String>,
    replace: bool,
) -> Result<RegisterJobRequest, ClientError> {
    let config = read_table(path)?;
    let job_id = match job_id {
        Some(id) => id,
        None => path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
            .ok_or_else(|| ConfigError::UnresolvablePath {
                path: path.to_path_buf(),
                reason: "cannot derive a job id from the file name".to_string(),
            })?,
    };
    Ok(RegisterJobRequest {
        job_id,
        config: Value::Object(config),
        schedule: None,
        replace_existing: replace,
    })
}

/// Client for one scheduler server.
#[derive(Debug, Clone)]
pub struct SchedulerClient {
    http: reqwest::Client,
    base_url: String,
}

impl SchedulerClient {
    /// Create a client for the server at `base_url`, e.g. `http://host:5000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Server base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`
    pub async fn health(&self) -> Result<Value, ClientError> {
        self.get("/health").await
    }

    /// Register a job. `POST /jobs`
    pub async fn register(&self, request: &RegisterJobRequest) -> Result<Value, ClientError> {
        let response = self.http.post(self.url("/jobs")).json(request).send().await?;
        Self::parse_response(response).await
    }

    /// Run a registered job now; the response carries the execution id.
    ///
    /// `POST /jobs/{id}/trigger`
    pub async fn trigger(&self, job_id: &str) -> Result<Value, ClientError> {
        let response = self
            .http
            .post(self.url(&format!("/jobs/{job_id}/trigger")))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// `GET /jobs`
    pub async fn jobs(&self) -> Result<Value, ClientError> {
        self.get("/jobs").await
    }

    /// `GET /jobs/active`
    pub async fn active(&self) -> Result<Value, ClientError> {
        self.get("/jobs/active").await
    }

    /// `GET /registry?type=`
    pub async fn registry(&self, filter: JobFilter) -> Result<Value, ClientError> {
        let response = self
            .http
            .get(self.url("/registry"))
            .query(&[("type", filter.as_str())])
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Execution state, or the schedule of a job. `GET /jobs/{id}`
    pub async fn status(&self, id: &str) -> Result<Value, ClientError> {
        self.get(&format!("/jobs/{id}")).await
    }

    /// Registry entry. `GET /registry/{id}`
    pub async fn info(&self, job_id: &str) -> Result<Value, ClientError> {
        self.get(&format!("/registry/{job_id}")).await
    }

    /// Cancel a schedule or drop a finished execution. `DELETE /jobs/{id}`
    pub async fn cancel(&self, id: &str) -> Result<Value, ClientError> {
        let response = self.http.delete(self.url(&format!("/jobs/{id}"))).send().await?;
        Self::parse_response(response).await
    }

    /// Remove a job for good. `DELETE /registry/{id}`
    pub async fn unregister(&self, job_id: &str) -> Result<Value, ClientError> {
        let response = self
            .http
            .delete(self.url(&format!("/registry/{job_id}")))
            .send()
            .await?;
        Self::parse_response(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get(&self, path: &str) -> Result<Value, ClientError> {
        let response = self.http.get(self.url(path)).send().await?;
        Self::parse_response(response).await
    }

    /// Decode a JSON body, turning non-2xx statuses into [`ClientError::Api`].
    async fn parse_response(response: reqwest::Response) -> Result<Value, ClientError> {
        let status = response.status();
        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if status.is_success() {
            return Ok(body);
        }

        let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);
        Err(ClientError::Api {
            status: status.as_u16(),
            kind: field("error").unwrap_or_else(|| "unknown".to_string()),
            message: field("message")
                .or_else(|| body.as_str().map(str::to_string))
                .unwrap_or_default(),
            hint: field("hint"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = SchedulerClient::new("http://localhost:5000/");
        assert_eq!(client.base_url(), "http://localhost:5000");
        assert_eq!(client.url("/jobs"), "http://localhost:5000/jobs");
    }

    #[test]
    fn test_load_job_file_defaults_id_to_stem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nightly.toml");
        std::fs::write(&path, "[lifetime]\nlifetime = 5\n\n[schedule]\ntrigger = \"cron\"\nhour = 2\n")
            .unwrap();

        let request = load_job_file(&path, None, true).unwrap();
        assert_eq!(request.job_id, "nightly");
        assert!(request.replace_existing);
        assert_eq!(request.config["schedule"]["hour"], 2);

        let named = load_job_file(&path, Some("custom".into()), false).unwrap();
        assert_eq!(named.job_id, "custom");
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_job_file(Path::new("/nonexistent/job.toml"), None, false).unwrap_err();
        assert!(matches!(err, ClientError::Config(ConfigError::UnresolvablePath { .. })));
    }
}

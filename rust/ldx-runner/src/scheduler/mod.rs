//! Job scheduling.
//!
//! Jobs fire on a cron or interval [`Trigger`], or on demand. Every firing
//! gets its own [`ExecutionContext`], tracked in memory until removed.

pub mod cron;
pub mod ids;
mod service;
pub mod spec;

pub use cron::{CronExpression, CronField, FieldKind};
pub use ids::ExecutionIdGenerator;
pub use service::{Cancelled, Registration, SchedulerError, SchedulerService};
pub use spec::{CronSchedule, FieldValue, ScheduleSpec, Trigger};

use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{ExecutionOutcome, Phase};

/// Status of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Waiting for a worker.
    Pending,
    /// Lifecycle in progress.
    Running,
    /// Finished cleanly.
    Completed,
    /// Aborted by validation or failed in a plugin step.
    Failed,
}

impl ExecutionStatus {
    /// Status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the execution is over.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one firing of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Unique id of this firing.
    pub execution_id: String,
    /// Job that fired.
    pub job_id: String,
    /// Current status.
    pub status: ExecutionStatus,
    /// Terminal lifecycle phase, once known.
    pub phase: Option<Phase>,
    /// Plugins taking part in the run.
    pub plugin_count: usize,
    /// When the trigger was accepted.
    pub created_at: DateTime<Utc>,
    /// When a worker picked the run up.
    pub start_time: Option<DateTime<Utc>>,
    /// When the run ended.
    pub end_time: Option<DateTime<Utc>>,
    /// Failure description.
    pub error: Option<String>,
}

impl ExecutionContext {
    /// A fresh pending context.
    #[must_use]
    pub fn pending(execution_id: impl Into<String>, job_id: impl Into<String>, plugin_count: usize) -> Self {
        Self {
            execution_id: execution_id.into(),
            job_id: job_id.into(),
            status: ExecutionStatus::Pending,
            phase: None,
            plugin_count,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            error: None,
        }
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
        self.start_time = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self, outcome: &ExecutionOutcome) {
        self.status = if outcome.is_success() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        self.phase = Some(outcome.phase());
        self.error = outcome.error_message();
        self.end_time = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, message: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.phase = Some(Phase::Failed);
        self.error = Some(message.into());
        self.end_time = Some(Utc::now());
    }

    /// Run time in milliseconds, once finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        Some((self.end_time? - self.start_time?).num_milliseconds())
    }
}

/// A job with an installed trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    /// Scheduled job.
    pub job_id: String,
    /// `cron` or `interval`.
    pub trigger: String,
    /// Canonical trigger signature.
    pub signature: String,
    /// Trigger definition.
    pub schedule: ScheduleSpec,
    /// Next firing, `None` if the trigger never fires again.
    pub next_run: Option<DateTime<Local>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PluginRuntimeError;
    use crate::plugin::PluginStep;

    #[test]
    fn test_context_lifecycle() {
        let mut ctx = ExecutionContext::pending("job_1", "job", 2);
        assert_eq!(ctx.status, ExecutionStatus::Pending);
        assert!(ctx.duration_ms().is_none());

        ctx.mark_running();
        ctx.finish(&ExecutionOutcome::Completed { stopped_by: Some("lifetime".into()) });
        assert_eq!(ctx.status, ExecutionStatus::Completed);
        assert_eq!(ctx.phase, Some(Phase::Completed));
        assert!(ctx.error.is_none());
        assert!(ctx.duration_ms().is_some());
    }

    #[test]
    fn test_aborted_counts_as_failed() {
        let mut ctx = ExecutionContext::pending("job_1", "job", 2);
        ctx.mark_running();
        ctx.finish(&ExecutionOutcome::Aborted { rejected_by: vec!["p1".into()] });
        assert_eq!(ctx.status, ExecutionStatus::Failed);
        assert_eq!(ctx.phase, Some(Phase::Aborted));
        assert_eq!(ctx.error.as_deref(), Some("validation failed for: p1"));
    }

    #[test]
    fn test_failure_message_kept() {
        let mut ctx = ExecutionContext::pending("job_1", "job", 1);
        ctx.finish(&ExecutionOutcome::Failed {
            error: PluginRuntimeError {
                env_key: "os".into(),
                step: PluginStep::Start,
                message: "exit status 2".into(),
            },
        });
        assert!(ctx.status.is_terminal());
        assert!(ctx.error.unwrap().contains("exit status 2"));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_value(ExecutionStatus::Running).unwrap(),
            serde_json::json!("running")
        );
    }
}

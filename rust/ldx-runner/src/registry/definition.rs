use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ResolvedConfig;
use crate::scheduler::ScheduleSpec;

/// A registered job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Stable job identifier.
    pub job_id: String,
    /// Resolved plugin configuration.
    pub config: ResolvedConfig,
    /// Trigger; `None` for on-demand jobs.
    pub schedule: Option<ScheduleSpec>,
    /// Where the job came from (`api`, `config:<file>`).
    pub source: String,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Last trigger time.
    #[serde(default, alias = "last_triggered")]
    pub last_triggered_at: Option<DateTime<Utc>>,
    /// Number of triggers so far.
    #[serde(default)]
    pub execution_count: u64,
}

impl JobDefinition {
    /// Create a definition registered now.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        config: ResolvedConfig,
        schedule: Option<ScheduleSpec>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            config,
            schedule,
            source: source.into(),
            registered_at: Utc::now(),
            last_triggered_at: None,
            execution_count: 0,
        }
    }

    /// Whether the job fires on its own.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.schedule.is_some()
    }
}

/// Registry listing filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobFilter {
    /// Every job.
    #[default]
    All,
    /// Jobs with a schedule.
    Scheduled,
    /// Jobs without a schedule.
    #[serde(alias = "on-demand")]
    OnDemand,
}

impl JobFilter {
    /// Whether `job` passes the filter.
    #[must_use]
    pub fn matches(self, job: &JobDefinition) -> bool {
        match self {
            Self::All => true,
            Self::Scheduled => job.is_scheduled(),
            Self::OnDemand => !job.is_scheduled(),
        }
    }

    /// Filter name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Scheduled => "scheduled",
            Self::OnDemand => "on_demand",
        }
    }
}

impl fmt::Display for JobFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "scheduled" => Ok(Self::Scheduled),
            "on_demand" | "on-demand" => Ok(Self::OnDemand),
            other => Err(format!(
                "unknown filter '{other}', expected all, scheduled or on_demand"
            )),
        }
    }
}

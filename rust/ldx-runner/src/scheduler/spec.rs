//! Trigger definitions.
//!
//! ```toml
//! [schedule]
//! trigger = "cron"
//! hour = 10
//! minute = 30
//! day_of_week = "mon-fri"
//! ```
//!
//! ```toml
//! [schedule]
//! trigger = "interval"
//! seconds = 900
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use super::cron::{CronExpression, CronField, FieldKind};
use crate::config::ConfigError;

/// A cron field as written: a bare number or an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// `hour = 10`
    Number(u32),
    /// `hour = "9-17"`
    Expr(String),
}

impl FieldValue {
    fn any() -> Self {
        Self::Expr("*".to_string())
    }

    fn zero() -> Self {
        Self::Number(0)
    }

    fn compile(&self, kind: FieldKind) -> Result<CronField, String> {
        match self {
            Self::Number(n) => CronField::parse(kind, &n.to_string()),
            Self::Expr(expr) => CronField::parse(kind, expr),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Expr(expr) => f.write_str(expr),
        }
    }
}

/// Cron trigger fields. Only `hour` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    /// Second of the minute (default 0).
    #[serde(default = "FieldValue::zero")]
    pub second: FieldValue,
    /// Minute of the hour (default 0).
    #[serde(default = "FieldValue::zero")]
    pub minute: FieldValue,
    /// Hour of the day.
    pub hour: FieldValue,
    /// Day of the month (default `*`).
    #[serde(default = "FieldValue::any")]
    pub day: FieldValue,
    /// Month (default `*`).
    #[serde(default = "FieldValue::any")]
    pub month: FieldValue,
    /// Day of the week, 0 or `sun` = Sunday (default `*`).
    #[serde(default = "FieldValue::any")]
    pub day_of_week: FieldValue,
}

impl CronSchedule {
    /// Daily trigger at `hour:minute:00`.
    #[must_use]
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self {
            second: FieldValue::zero(),
            minute: FieldValue::Number(minute),
            hour: FieldValue::Number(hour),
            day: FieldValue::any(),
            month: FieldValue::any(),
            day_of_week: FieldValue::any(),
        }
    }

    /// Parse every field.
    pub fn compile(&self) -> Result<CronExpression, ConfigError> {
        let field = |value: &FieldValue, kind| value.compile(kind).map_err(ConfigError::InvalidSchedule);
        Ok(CronExpression::new(
            field(&self.second, FieldKind::Second)?,
            field(&self.minute, FieldKind::Minute)?,
            field(&self.hour, FieldKind::Hour)?,
            field(&self.day, FieldKind::Day)?,
            field(&self.month, FieldKind::Month)?,
            field(&self.day_of_week, FieldKind::DayOfWeek)?,
        ))
    }
}

/// When a scheduled job fires.
///
/// Immutable once attached to a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "lowercase")]
pub enum ScheduleSpec {
    /// Calendar trigger.
    Cron(CronSchedule),
    /// Fixed period, first firing one period after registration.
    Interval {
        /// Period in seconds.
        #[serde(alias = "interval_seconds")]
        seconds: u64,
    },
}

impl ScheduleSpec {
    /// Parse and check a `schedule` section.
    pub fn from_section(section: &serde_json::Value) -> Result<Self, ConfigError> {
        let spec: Self = serde_json::from_value(section.clone())
            .map_err(|e| ConfigError::InvalidSchedule(e.to_string()))?;
        spec.compile()?;
        Ok(spec)
    }

    /// Trigger kind: `cron` or `interval`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Cron(_) => "cron",
            Self::Interval { .. } => "interval",
        }
    }

    /// Compile into an evaluable trigger.
    pub fn compile(&self) -> Result<Trigger, ConfigError> {
        match self {
            Self::Cron(cron) => cron.compile().map(Trigger::Cron),
            Self::Interval { seconds: 0 } => Err(ConfigError::InvalidSchedule(
                "interval seconds must be greater than zero".to_string(),
            )),
            Self::Interval { seconds } => Ok(Trigger::Interval(Duration::from_secs(*seconds))),
        }
    }

    /// Canonical signature used for conflict detection.
    ///
    /// Cron fields are normalized, so `day_of_week = "fri,mon"` and
    /// `day_of_week = "1,5"` produce the same signature.
    #[must_use]
    pub fn signature(&self) -> String {
        match self.compile() {
            Ok(trigger) => trigger.signature(),
            Err(_) => self.raw_signature(),
        }
    }

    fn raw_signature(&self) -> String {
        match self {
            Self::Cron(c) => format!(
                "cron:s={};m={};h={};dom={};mon={};dow={}",
                c.second, c.minute, c.hour, c.day, c.month, c.day_of_week
            ),
            Self::Interval { seconds } => format!("interval:{seconds}"),
        }
    }
}

/// A compiled trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Cron expression.
    Cron(CronExpression),
    /// Fixed period.
    Interval(Duration),
}

impl Trigger {
    /// Canonical signature.
    #[must_use]
    pub fn signature(&self) -> String {
        match self {
            Self::Cron(expr) => expr.signature(),
            Self::Interval(period) => format!("interval:{}", period.as_secs()),
        }
    }

    /// Next firing strictly after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Self::Cron(expr) => expr.next_after(after),
            Self::Interval(period) => {
                let period = chrono::Duration::from_std(*period).ok()?;
                after.clone().checked_add_signed(period)
            }
        }
    }
}

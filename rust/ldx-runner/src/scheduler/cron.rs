//! Cron field parsing and evaluation.
//!
//! Each field accepts `*`, `n`, `a-b`, `a,b,c` and `*/n`. Day-of-week also
//! accepts `sun`..`sat` (0 = Sunday). Fields carry a normalized text form so
//! equivalent schedules (`mon,fri` and `5,1`) compare equal.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDateTime, TimeZone, Timelike};

const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Which cron field is being parsed; fixes its range and names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 0-59.
    Second,
    /// 0-59.
    Minute,
    /// 0-23.
    Hour,
    /// 1-31.
    Day,
    /// 1-12.
    Month,
    /// 0-6, Sunday = 0.
    DayOfWeek,
}

impl FieldKind {
    const fn bounds(self) -> (u32, u32) {
        match self {
            Self::Second | Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::Day => (1, 31),
            Self::Month => (1, 12),
            Self::DayOfWeek => (0, 6),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
            Self::DayOfWeek => "day_of_week",
        }
    }
}

/// A single parsed cron field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronField {
    /// Wildcard (*) - matches all values.
    Any,
    /// Specific value.
    Value(u32),
    /// List of values, sorted and deduplicated.
    List(Vec<u32>),
    /// Inclusive range.
    Range(u32, u32),
    /// Every n-th value from the field's minimum (`*/n`).
    Step {
        /// Step size.
        step: u32,
        /// Field minimum the steps count from.
        min: u32,
    },
}

impl CronField {
    /// Parse one field.
    pub fn parse(kind: FieldKind, text: &str) -> Result<Self, String> {
        let (min, max) = kind.bounds();
        let text = text.trim();
        let invalid = |msg: String| format!("invalid {} field '{text}': {msg}", kind.name());

        if text == "*" {
            return Ok(Self::Any);
        }

        if let Some(step) = text.strip_prefix("*/") {
            let step: u32 = step.parse().map_err(|e| invalid(format!("bad step: {e}")))?;
            if step == 0 || step > max {
                return Err(invalid(format!("step must be 1-{max}")));
            }
            return Ok(Self::Step { step, min });
        }

        if text.contains(',') {
            let mut values = text
                .split(',')
                .map(|part| parse_value(kind, part).map_err(&invalid))
                .collect::<Result<Vec<u32>, String>>()?;
            values.sort_unstable();
            values.dedup();
            return Ok(match values.as_slice() {
                [single] => Self::Value(*single),
                _ => Self::List(values),
            });
        }

        if let Some((start, end)) = text.split_once('-') {
            let start = parse_value(kind, start).map_err(&invalid)?;
            let end = parse_value(kind, end).map_err(&invalid)?;
            if start > end {
                return Err(invalid(format!("range start {start} is after end {end}")));
            }
            return Ok(if start == min && end == max {
                Self::Any
            } else {
                Self::Range(start, end)
            });
        }

        parse_value(kind, text).map(Self::Value).map_err(invalid)
    }

    /// Check if the field matches the given value.
    #[must_use]
    pub fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Value(v) => *v == value,
            Self::List(values) => values.binary_search(&value).is_ok(),
            Self::Range(start, end) => (*start..=*end).contains(&value),
            Self::Step { step, min } => value >= *min && (value - min) % step == 0,
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Value(v) => write!(f, "{v}"),
            Self::List(values) => {
                let joined: Vec<String> = values.iter().map(u32::to_string).collect();
                f.write_str(&joined.join(","))
            }
            Self::Range(start, end) => write!(f, "{start}-{end}"),
            Self::Step { step, .. } => write!(f, "*/{step}"),
        }
    }
}

fn parse_value(kind: FieldKind, text: &str) -> Result<u32, String> {
    let text = text.trim();
    let (min, max) = kind.bounds();

    let named = if kind == FieldKind::DayOfWeek {
        let lower = text.to_ascii_lowercase();
        WEEKDAY_NAMES
            .iter()
            .position(|name| *name == lower)
            .and_then(|index| u32::try_from(index).ok())
    } else {
        None
    };
    let value = match named {
        Some(value) => value,
        None => text
            .parse::<u32>()
            .map_err(|e| format!("'{text}' is not a number: {e}"))?,
    };

    if !(min..=max).contains(&value) {
        return Err(format!("value {value} out of range {min}-{max}"));
    }
    Ok(value)
}

/// A compiled six-field cron trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    second: CronField,
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpression {
    /// Build from already-parsed fields.
    #[must_use]
    pub fn new(
        second: CronField,
        minute: CronField,
        hour: CronField,
        day: CronField,
        month: CronField,
        day_of_week: CronField,
    ) -> Self {
        Self {
            second,
            minute,
            hour,
            day,
            month,
            day_of_week,
        }
    }

    /// Canonical signature used for conflict detection.
    #[must_use]
    pub fn signature(&self) -> String {
        format!(
            "cron:s={};m={};h={};dom={};mon={};dow={}",
            self.second, self.minute, self.hour, self.day, self.month, self.day_of_week
        )
    }

    /// Check if the expression matches the given time, to the second.
    pub fn matches<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        let local = time.naive_local();
        self.second.matches(local.second()) && self.matches_minute(&local)
    }

    fn matches_minute(&self, time: &NaiveDateTime) -> bool {
        self.minute.matches(time.minute())
            && self.hour.matches(time.hour())
            && self.day.matches(time.day())
            && self.month.matches(time.month())
            && self.day_of_week.matches(time.weekday().num_days_from_sunday())
    }

    /// First matching time strictly after `after`, searching one year ahead.
    ///
    /// The search walks wall-clock time in `after`'s zone. Wall times that
    /// a DST gap skips never fire; a wall time repeated by a DST fold fires
    /// at its first occurrence that is still after `after`.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let zone = after.timezone();
        let start = after.naive_local().with_nanosecond(0)? + Duration::seconds(1);
        let mut minute = start.with_second(0)?;
        let mut first_second = start.second();

        for _ in 0..=(366 * 24 * 60) {
            if self.matches_minute(&minute) {
                for second in (first_second..60).filter(|s| self.second.matches(*s)) {
                    let Some(wall) = minute.with_second(second) else {
                        continue;
                    };
                    let candidate = match zone.from_local_datetime(&wall) {
                        LocalResult::Single(time) => Some(time),
                        LocalResult::Ambiguous(first, _) if first > *after => Some(first),
                        LocalResult::Ambiguous(_, second) => Some(second),
                        LocalResult::None => None,
                    };
                    if let Some(time) = candidate.filter(|time| time > after) {
                        return Some(time);
                    }
                }
            }
            minute += Duration::minutes(1);
            first_second = 0;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
            .and_utc()
    }

    fn daily(hour: u32, minute: u32) -> CronExpression {
        CronExpression::new(
            CronField::Value(0),
            CronField::Value(minute),
            CronField::Value(hour),
            CronField::Any,
            CronField::Any,
            CronField::Any,
        )
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(CronField::parse(FieldKind::Minute, "*").unwrap(), CronField::Any);
        assert_eq!(
            CronField::parse(FieldKind::Minute, "*/15").unwrap(),
            CronField::Step { step: 15, min: 0 }
        );
        assert_eq!(
            CronField::parse(FieldKind::Hour, "9-17").unwrap(),
            CronField::Range(9, 17)
        );
        assert_eq!(
            CronField::parse(FieldKind::Hour, "17,9,9").unwrap(),
            CronField::List(vec![9, 17])
        );
        assert_eq!(
            CronField::parse(FieldKind::DayOfWeek, "Sun").unwrap(),
            CronField::Value(0)
        );
        assert_eq!(
            CronField::parse(FieldKind::DayOfWeek, "mon-fri").unwrap(),
            CronField::Range(1, 5)
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert!(CronField::parse(FieldKind::Minute, "60").is_err());
        assert!(CronField::parse(FieldKind::Hour, "5-2").is_err());
        assert!(CronField::parse(FieldKind::Day, "0").is_err());
        assert!(CronField::parse(FieldKind::Minute, "*/0").is_err());
        assert!(CronField::parse(FieldKind::DayOfWeek, "funday").is_err());
    }

    #[test]
    fn test_day_step_counts_from_one() {
        let field = CronField::parse(FieldKind::Day, "*/5").unwrap();
        assert!(field.matches(1));
        assert!(field.matches(6));
        assert!(!field.matches(5));
    }

    #[test]
    fn test_normalized_signature() {
        let a = CronExpression::new(
            CronField::Value(0),
            CronField::Value(30),
            CronField::Value(10),
            CronField::Any,
            CronField::Any,
            CronField::parse(FieldKind::DayOfWeek, "fri,mon").unwrap(),
        );
        assert_eq!(a.signature(), "cron:s=0;m=30;h=10;dom=*;mon=*;dow=1,5");
    }

    #[test]
    fn test_next_after_same_day() {
        let expr = daily(10, 30);
        let next = expr.next_after(&at(2026, 3, 2, 9, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 2, 10, 30, 0));
    }

    #[test]
    fn test_next_after_rolls_to_next_day() {
        let expr = daily(10, 30);
        let next = expr.next_after(&at(2026, 3, 2, 10, 30, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 3, 10, 30, 0));
    }

    #[test]
    fn test_next_after_seconds_within_minute() {
        let expr = CronExpression::new(
            CronField::Step { step: 20, min: 0 },
            CronField::Any,
            CronField::Any,
            CronField::Any,
            CronField::Any,
            CronField::Any,
        );
        let next = expr.next_after(&at(2026, 3, 2, 9, 0, 5)).unwrap();
        assert_eq!(next, at(2026, 3, 2, 9, 0, 20));
        assert!(expr.matches(&next));
    }

    #[test]
    fn test_next_after_weekday() {
        // 2026-03-02 is a Monday.
        let expr = CronExpression::new(
            CronField::Value(0),
            CronField::Value(0),
            CronField::Value(8),
            CronField::Any,
            CronField::Any,
            CronField::Value(6),
        );
        let next = expr.next_after(&at(2026, 3, 2, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 7, 8, 0, 0));
    }

    #[test]
    fn test_next_after_crosses_dst_fold() {
        use chrono_tz::America::New_York;

        // 2026-11-01 01:00-02:00 happens twice in New York.
        let expr = daily(3, 0);
        let before_fold = at(2026, 11, 1, 4, 59, 30).with_timezone(&New_York);
        let next = expr.next_after(&before_fold).unwrap();
        assert_eq!(next.with_timezone(&Utc), at(2026, 11, 1, 8, 0, 0));

        let day_before = at(2026, 10, 31, 16, 0, 0).with_timezone(&New_York);
        let next = expr.next_after(&day_before).unwrap();
        assert_eq!(next.with_timezone(&Utc), at(2026, 11, 1, 8, 0, 0));
    }

    #[test]
    fn test_next_after_inside_repeated_hour() {
        use chrono_tz::America::New_York;

        let expr = daily(1, 30);
        // 00:59:30 EDT: the first 01:30 (EDT) is next.
        let start = at(2026, 11, 1, 4, 59, 30).with_timezone(&New_York);
        assert_eq!(
            expr.next_after(&start).unwrap().with_timezone(&Utc),
            at(2026, 11, 1, 5, 30, 0)
        );

        // 01:10 EST, after the first 01:30 has passed: the repeated 01:30.
        let start = at(2026, 11, 1, 6, 10, 0).with_timezone(&New_York);
        assert_eq!(
            expr.next_after(&start).unwrap().with_timezone(&Utc),
            at(2026, 11, 1, 6, 30, 0)
        );
    }

    #[test]
    fn test_next_after_skips_dst_gap() {
        use chrono_tz::America::New_York;

        // 02:30 does not exist on 2026-03-08 in New York.
        let expr = daily(2, 30);
        let start = at(2026, 3, 8, 5, 0, 0).with_timezone(&New_York);
        assert_eq!(
            expr.next_after(&start).unwrap().with_timezone(&Utc),
            at(2026, 3, 9, 6, 30, 0)
        );
    }

    proptest::proptest! {
        #[test]
        fn prop_daily_next_is_strictly_later_match_within_a_day(
            hour in 0u32..24,
            minute in 0u32..60,
            start_hour in 0u32..24,
            start_minute in 0u32..60,
            start_second in 0u32..60,
        ) {
            let expr = daily(hour, minute);
            let start = at(2026, 3, 2, start_hour, start_minute, start_second);
            let next = expr.next_after(&start).unwrap();
            proptest::prop_assert!(next > start);
            proptest::prop_assert!(expr.matches(&next));
            proptest::prop_assert!(next - start <= Duration::days(1));
        }

        #[test]
        fn prop_list_order_does_not_change_field(mut values in proptest::collection::vec(0u32..60, 2..6)) {
            let forward = values.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
            values.reverse();
            let backward = values.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
            proptest::prop_assert_eq!(
                CronField::parse(FieldKind::Minute, &forward).unwrap(),
                CronField::parse(FieldKind::Minute, &backward).unwrap()
            );
        }
    }
}

//! Execution id generation.

use std::collections::HashMap;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// Issues `<job_id>_<YYYYmmdd_HHMMSS_micros>` ids.
///
/// Two triggers of the same job within one microsecond get `-1`, `-2`, ...
/// appended, so ids never repeat.
#[derive(Debug, Default)]
pub struct ExecutionIdGenerator {
    last: Mutex<HashMap<String, (String, u32)>>,
}

impl ExecutionIdGenerator {
    /// Create a generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for `job_id`, stamped with the current time.
    pub fn next(&self, job_id: &str) -> String {
        self.next_at(job_id, Local::now())
    }

    /// Next id for `job_id`, stamped with `now`.
    pub fn next_at(&self, job_id: &str, now: DateTime<Local>) -> String {
        let base = format!("{job_id}_{}", now.format("%Y%m%d_%H%M%S_%6f"));
        let mut last = self.last.lock();
        if let Some((previous, count)) = last.get_mut(job_id) {
            if *previous == base {
                *count += 1;
                return format!("{base}-{count}");
            }
        }
        last.insert(job_id.to_string(), (base.clone(), 0));
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let generator = ExecutionIdGenerator::new();
        let id = generator.next("backup");
        let stamp = id.strip_prefix("backup_").unwrap();
        // YYYYmmdd_HHMMSS_ffffff
        assert_eq!(stamp.len(), 22);
    }

    #[test]
    fn test_same_instant_disambiguated() {
        let generator = ExecutionIdGenerator::new();
        let now = Local::now();
        let a = generator.next_at("job", now);
        let b = generator.next_at("job", now);
        let c = generator.next_at("job", now);
        assert_ne!(a, b);
        assert_eq!(b, format!("{a}-1"));
        assert_eq!(c, format!("{a}-2"));
    }

    #[test]
    fn test_jobs_tracked_separately() {
        let generator = ExecutionIdGenerator::new();
        let now = Local::now();
        let a = generator.next_at("a", now);
        let b = generator.next_at("b", now);
        assert!(!a.contains('-'));
        assert!(!b.contains('-'));
    }
}

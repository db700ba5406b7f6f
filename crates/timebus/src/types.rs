//! Scheduler types.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Unique identity of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(u64);

impl TaskKey {
    /// Wrap a raw key value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw key value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unit in which a task's delay and period are expressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert `amount` of this unit into a [`Duration`], saturating on overflow.
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(60 * 60)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(24 * 60 * 60)),
        }
    }

    /// Short suffix used in log lines.
    pub fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "ns",
            TimeUnit::Microseconds => "us",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Seconds => "s",
            TimeUnit::Minutes => "m",
            TimeUnit::Hours => "h",
            TimeUnit::Days => "d",
        }
    }
}

/// One firing of a scheduled task, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Diagnostic label the task was scheduled with.
    pub name: String,
    /// Key of the record that fired.
    pub key: TaskKey,
}

impl TaskInfo {
    pub fn new(name: impl Into<String>, key: TaskKey) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_conversions() {
        assert_eq!(TimeUnit::Nanoseconds.to_duration(5), Duration::from_nanos(5));
        assert_eq!(TimeUnit::Microseconds.to_duration(5), Duration::from_micros(5));
        assert_eq!(TimeUnit::Milliseconds.to_duration(5), Duration::from_millis(5));
        assert_eq!(TimeUnit::Seconds.to_duration(5), Duration::from_secs(5));
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
        assert_eq!(TimeUnit::Hours.to_duration(1), Duration::from_secs(3600));
        assert_eq!(TimeUnit::Days.to_duration(1), Duration::from_secs(86_400));
    }

    #[test]
    fn test_time_unit_saturates() {
        // Must not panic on overflow
        let d = TimeUnit::Days.to_duration(u64::MAX);
        assert_eq!(d, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_time_unit_default_is_seconds() {
        assert_eq!(TimeUnit::default(), TimeUnit::Seconds);
    }

    #[test]
    fn test_time_unit_serde_snake_case() {
        let json = serde_json::to_string(&TimeUnit::Milliseconds).unwrap();
        assert_eq!(json, "\"milliseconds\"");
        let unit: TimeUnit = serde_json::from_str("\"minutes\"").unwrap();
        assert_eq!(unit, TimeUnit::Minutes);
    }

    #[test]
    fn test_task_key_display_and_order() {
        let a = TaskKey::new(100);
        let b = TaskKey::new(101);
        assert!(a < b);
        assert_eq!(a.to_string(), "100");
        assert_eq!(b.get(), 101);
    }

    #[test]
    fn test_task_info_serializes_key_transparently() {
        let info = TaskInfo::new("banner", TaskKey::new(7));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "banner", "key": 7 }));
    }
}

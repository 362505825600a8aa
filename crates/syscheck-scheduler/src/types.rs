use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Group used when a key is created without an explicit group.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Arbitrary data attached to a job or trigger and handed to every execution.
pub type JobDataMap = serde_json::Map<String, serde_json::Value>;

/// Identity of a job: unique `(group, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub name: String,
    pub group: String,
}

impl JobKey {
    /// Key in the default group.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_group(name, DEFAULT_GROUP)
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Identity of a trigger: unique `(group, name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_group(name, DEFAULT_GROUP)
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Selects keys by group when listing or when attaching listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMatcher {
    AnyGroup,
    Equals(String),
}

impl GroupMatcher {
    pub fn group_equals(group: impl Into<String>) -> Self {
        GroupMatcher::Equals(group.into())
    }

    pub fn matches(&self, group: &str) -> bool {
        match self {
            GroupMatcher::AnyGroup => true,
            GroupMatcher::Equals(g) => g == group,
        }
    }
}

/// Defines when a trigger fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire exactly once at the given UTC instant.
    Once { at: DateTime<Utc> },

    /// Fire on a Quartz-style cron expression
    /// (`sec min hour day-of-month month day-of-week [year]`).
    Cron { expression: String },
}

/// What to do when a firing is overdue by more than the misfire threshold
/// (engine downtime, saturated worker pool, a trigger starting in the past).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
    /// Fire the single most overdue run immediately, then resume the
    /// normal schedule. Missed intervals are not replayed one by one.
    FireOnceNow,
    /// Skip the overdue run and wait for the next scheduled time.
    DoNothing,
}

/// Static definition of a job. The job instance itself is built per firing
/// by the [`crate::JobFactory`] registered for `job_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetail {
    pub key: JobKey,
    pub job_type: String,
    pub description: Option<String>,
    pub data: JobDataMap,
    /// Durable jobs stay registered when they have no triggers left.
    pub durable: bool,
}

impl JobDetail {
    pub fn new(key: JobKey, job_type: impl Into<String>) -> Self {
        Self {
            key,
            job_type: job_type.into(),
            description: None,
            data: JobDataMap::new(),
            durable: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    pub fn store_durably(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Integer job data, `None` when absent or not an integer.
    pub fn data_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(serde_json::Value::as_i64)
    }

    /// Description when set, otherwise the key. Used in log lines.
    pub fn display_name(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| self.key.to_string())
    }
}

/// When and how a job fires. Bound to exactly one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub key: TriggerKey,
    pub job_key: JobKey,
    pub schedule: Schedule,
    /// No firing happens before this instant.
    pub start_at: DateTime<Utc>,
    pub misfire: MisfirePolicy,
    pub data: JobDataMap,
}

impl Trigger {
    /// Cron trigger starting now with the fire-once-now misfire policy.
    pub fn cron(key: TriggerKey, job_key: JobKey, expression: impl Into<String>) -> Self {
        Self {
            key,
            job_key,
            schedule: Schedule::Cron {
                expression: expression.into(),
            },
            start_at: Utc::now(),
            misfire: MisfirePolicy::FireOnceNow,
            data: JobDataMap::new(),
        }
    }

    /// One-shot trigger firing at `at`.
    pub fn once(key: TriggerKey, job_key: JobKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            job_key,
            schedule: Schedule::Once { at },
            start_at: at,
            misfire: MisfirePolicy::FireOnceNow,
            data: JobDataMap::new(),
        }
    }

    pub fn starting_at(mut self, start_at: DateTime<Utc>) -> Self {
        self.start_at = start_at;
        self
    }

    pub fn with_misfire(mut self, misfire: MisfirePolicy) -> Self {
        self.misfire = misfire;
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// The cron expression, when this is a cron trigger.
    pub fn cron_expression(&self) -> Option<&str> {
        match &self.schedule {
            Schedule::Cron { expression } => Some(expression),
            Schedule::Once { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_default_to_default_group() {
        let key = JobKey::new("Check 1");
        assert_eq!(key.group, DEFAULT_GROUP);
        assert_eq!(key.to_string(), "DEFAULT.Check 1");
    }

    #[test]
    fn group_matcher_filters_by_group() {
        assert!(GroupMatcher::AnyGroup.matches("anything"));
        let m = GroupMatcher::group_equals("Check 3");
        assert!(m.matches("Check 3"));
        assert!(!m.matches("Check 30"));
    }

    #[test]
    fn job_data_reads_integers() {
        let detail = JobDetail::new(JobKey::new("Check 9"), "check")
            .with_data("CheckToPerformId", 9)
            .with_data("label", "nine");
        assert_eq!(detail.data_i64("CheckToPerformId"), Some(9));
        assert_eq!(detail.data_i64("label"), None);
        assert_eq!(detail.data_i64("missing"), None);
        assert_eq!(detail.display_name(), "DEFAULT.Check 9");
    }

    #[test]
    fn schedule_serialises_with_kind_tag() {
        let s = Schedule::Cron {
            expression: "0 * * * * ?".into(),
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains(r#""kind":"cron""#));
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A configured unit of recurring work, e.g. a round trip against one external system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    pub check_id: i64,
    /// Human-readable label, used as the live job's description.
    pub system_name: String,
    /// Registry key selecting the executor (e.g. "http", "tcp").
    pub check_type: String,
    /// Executor-specific settings, opaque to the scheduler.
    #[serde(default)]
    pub settings: serde_json::Value,
    pub enabled: bool,
    /// Bumped on every edit; the reconciler recreates the job when this is
    /// newer than its last pass.
    pub updated: DateTime<Utc>,
}

/// A cron-style schedule attached to a check. A check may have several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckTrigger {
    pub trigger_id: i64,
    pub check_id: i64,
    /// Quartz-style expression: `sec min hour day-of-month month day-of-week [year]`.
    pub cron_expression: String,
    /// Resume from the last recorded run instead of from now.
    pub perform_catch_up: bool,
    pub enabled: bool,
    pub updated: DateTime<Utc>,
}

/// Outcome classification persisted with every result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessStatus {
    Success,
    Warning,
    Failure,
    UnexpectedErrorDuringCheck,
}

impl SuccessStatus {
    /// Stable integer code stored in the results table.
    pub fn code(self) -> i64 {
        match self {
            SuccessStatus::Success => 1,
            SuccessStatus::Warning => 2,
            SuccessStatus::Failure => 3,
            SuccessStatus::UnexpectedErrorDuringCheck => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(SuccessStatus::Success),
            2 => Some(SuccessStatus::Warning),
            3 => Some(SuccessStatus::Failure),
            4 => Some(SuccessStatus::UnexpectedErrorDuringCheck),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, SuccessStatus::Success)
    }
}

impl fmt::Display for SuccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuccessStatus::Success => "success",
            SuccessStatus::Warning => "warning",
            SuccessStatus::Failure => "failure",
            SuccessStatus::UnexpectedErrorDuringCheck => "unexpected_error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SuccessStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(SuccessStatus::Success),
            "warning" => Ok(SuccessStatus::Warning),
            "failure" => Ok(SuccessStatus::Failure),
            "unexpected_error" => Ok(SuccessStatus::UnexpectedErrorDuringCheck),
            other => Err(format!("unknown success status: {other}")),
        }
    }
}

/// A persisted, append-only check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Store-assigned, monotonically increasing.
    pub result_id: i64,
    pub check_id: i64,
    /// When the check ran (the engine fire time).
    pub check_dts: DateTime<Utc>,
    pub status: SuccessStatus,
    pub failure_detail: Option<String>,
    /// Opaque JSON carried forward to the next run of the same check.
    pub run_data: Option<String>,
}

/// A result about to be appended; the store assigns `result_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCheckResult {
    pub check_id: i64,
    pub check_dts: DateTime<Utc>,
    pub status: SuccessStatus,
    pub failure_detail: Option<String>,
    pub run_data: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_stable() {
        for status in [
            SuccessStatus::Success,
            SuccessStatus::Warning,
            SuccessStatus::Failure,
            SuccessStatus::UnexpectedErrorDuringCheck,
        ] {
            assert_eq!(SuccessStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(SuccessStatus::from_code(0), None);
    }

    #[test]
    fn status_parses_display_form() {
        let parsed: SuccessStatus = "unexpected_error".parse().unwrap();
        assert_eq!(parsed, SuccessStatus::UnexpectedErrorDuringCheck);
        assert!("bogus".parse::<SuccessStatus>().is_err());
    }
}

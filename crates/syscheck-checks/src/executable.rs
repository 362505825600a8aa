use async_trait::async_trait;
use serde::de::DeserializeOwned;
use syscheck_core::{Check, CheckResult, SuccessStatus};

/// What a single check run concluded.
///
/// An unhealthy target is an outcome, not an error: it is persisted like any
/// other result.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub status: SuccessStatus,
    pub failure_detail: Option<String>,
    /// Carried forward and handed back to the next run as `last.run_data`.
    pub run_data: Option<serde_json::Value>,
}

impl CheckOutcome {
    pub fn success(run_data: serde_json::Value) -> Self {
        Self {
            status: SuccessStatus::Success,
            failure_detail: None,
            run_data: Some(run_data),
        }
    }

    pub fn warning(detail: impl Into<String>, run_data: serde_json::Value) -> Self {
        Self {
            status: SuccessStatus::Warning,
            failure_detail: Some(detail.into()),
            run_data: Some(run_data),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: SuccessStatus::Failure,
            failure_detail: Some(detail.into()),
            run_data: None,
        }
    }

    pub fn unexpected(detail: impl Into<String>) -> Self {
        Self {
            status: SuccessStatus::UnexpectedErrorDuringCheck,
            failure_detail: Some(detail.into()),
            run_data: None,
        }
    }

    /// Carry `run_data` forward even though the run did not succeed.
    pub fn with_run_data(mut self, run_data: serde_json::Value) -> Self {
        self.run_data = Some(run_data);
        self
    }
}

/// One check kind.
#[async_trait]
pub trait Executable: Send + Sync {
    /// Registry key, matched against `Check::check_type`.
    fn check_type(&self) -> &'static str;

    async fn perform(&self, check: &Check, last: Option<&CheckResult>) -> CheckOutcome;
}

/// Decode a check's settings, describing the failure for the result row.
pub fn parse_settings<T: DeserializeOwned>(check: &Check) -> Result<T, String> {
    serde_json::from_value(check.settings.clone())
        .map_err(|e| format!("invalid settings for {} check {}: {e}", check.check_type, check.check_id))
}

/// Parse the previous run's carried-forward JSON, if any.
pub fn last_run_data(last: Option<&CheckResult>) -> Option<serde_json::Value> {
    let raw = last?.run_data.as_deref()?;
    serde_json::from_str(raw).ok()
}

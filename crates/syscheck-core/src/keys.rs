//! Naming convention shared by the reconciler and the live schedule.
//!
//! These strings are part of the live engine's identity scheme and must not
//! change: a renamed key would make every existing job look foreign and get
//! deleted on the next reconciliation pass.

/// Job data key carrying the check id a scheduled check job performs.
pub const CHECK_TO_PERFORM_ID: &str = "CheckToPerformId";

/// Trigger data key carrying the desired-state trigger id.
pub const CHECK_TRIGGER_ID: &str = "CheckTriggerId";

/// Job name for a check: `Check {id}`.
pub fn check_job_name(check_id: i64) -> String {
    format!("Check {check_id}")
}

/// Trigger name for a trigger row: `Trigger {id}`.
pub fn trigger_name(trigger_id: i64) -> String {
    format!("Trigger {trigger_id}")
}

/// Every trigger of a check is grouped under the check's job name.
pub fn trigger_group(check_id: i64) -> String {
    check_job_name(check_id)
}

use chrono::{DateTime, Duration, Utc};
use syscheck_core::keys::{trigger_group, trigger_name, CHECK_TRIGGER_ID};
use syscheck_core::CheckTrigger;
use syscheck_scheduler::{CronSchedule, JobKey, MisfirePolicy, SchedulerError, Trigger, TriggerKey};
use syscheck_store::{ResultRepository, StoreError};
use thiserror::Error;

/// Added to every computed start so a cron slot equal to the last recorded
/// run is not fired a second time.
pub const CATCH_UP_EPSILON_SECS: i64 = 1;

#[derive(Debug, Error)]
pub enum TriggerBuildError {
    /// The cron expression does not parse. Skipped, never fatal.
    #[error(transparent)]
    InvalidCron(SchedulerError),

    /// The last result could not be read.
    #[error(transparent)]
    Repository(#[from] StoreError),
}

/// Earliest instant the trigger may fire.
///
/// Catch-up resumes right after the last recorded run, so a missed slot is
/// picked up by the misfire policy on start; without catch-up (or without
/// any prior run) the schedule starts from `now`.
pub fn start_time(
    perform_catch_up: bool,
    last_check_dts: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let base = if perform_catch_up {
        last_check_dts.unwrap_or(now)
    } else {
        now
    };
    base + Duration::seconds(CATCH_UP_EPSILON_SECS)
}

/// Build the live trigger for one desired-state trigger row.
///
/// The result repository is only consulted when the row asks for catch-up.
pub fn build_trigger(
    row: &CheckTrigger,
    job_key: &JobKey,
    now: DateTime<Utc>,
    results: &dyn ResultRepository,
) -> Result<Trigger, TriggerBuildError> {
    CronSchedule::parse(&row.cron_expression).map_err(TriggerBuildError::InvalidCron)?;

    let last_check_dts = if row.perform_catch_up {
        results.last_for_check(row.check_id)?.map(|r| r.check_dts)
    } else {
        None
    };

    let key = TriggerKey::with_group(trigger_name(row.trigger_id), trigger_group(row.check_id));
    Ok(
        Trigger::cron(key, job_key.clone(), row.cron_expression.clone())
            .starting_at(start_time(row.perform_catch_up, last_check_dts, now))
            .with_misfire(MisfirePolicy::FireOnceNow)
            .with_data(CHECK_TRIGGER_ID, row.trigger_id),
    )
}

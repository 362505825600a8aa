use chrono::{DateTime, Utc};
use syscheck_scheduler::{
    GroupMatcher, JobDetail, JobKey, Result, Scheduler, Trigger, TriggerKey,
};

/// The slice of the live engine the reconciler reads and mutates.
///
/// [`Scheduler`] is the production implementation; tests wrap it to record
/// or perturb calls.
pub trait ScheduleStore: Send + Sync {
    fn job_keys(&self, matcher: &GroupMatcher) -> Vec<JobKey>;
    fn trigger_keys(&self, matcher: &GroupMatcher) -> Vec<TriggerKey>;
    fn add_job(&self, detail: JobDetail, replace: bool) -> Result<()>;
    fn delete_job(&self, key: &JobKey) -> Result<bool>;
    fn schedule_job(&self, trigger: Trigger) -> Result<DateTime<Utc>>;
    /// `Ok(None)` when `old` is no longer scheduled.
    fn reschedule_job(&self, old: &TriggerKey, new: Trigger) -> Result<Option<DateTime<Utc>>>;
    fn unschedule_job(&self, key: &TriggerKey) -> Result<bool>;
}

impl ScheduleStore for Scheduler {
    fn job_keys(&self, matcher: &GroupMatcher) -> Vec<JobKey> {
        Scheduler::job_keys(self, matcher)
    }

    fn trigger_keys(&self, matcher: &GroupMatcher) -> Vec<TriggerKey> {
        Scheduler::trigger_keys(self, matcher)
    }

    fn add_job(&self, detail: JobDetail, replace: bool) -> Result<()> {
        Scheduler::add_job(self, detail, replace)
    }

    fn delete_job(&self, key: &JobKey) -> Result<bool> {
        Scheduler::delete_job(self, key)
    }

    fn schedule_job(&self, trigger: Trigger) -> Result<DateTime<Utc>> {
        Scheduler::schedule_job(self, trigger)
    }

    fn reschedule_job(&self, old: &TriggerKey, new: Trigger) -> Result<Option<DateTime<Utc>>> {
        Scheduler::reschedule_job(self, old, new)
    }

    fn unschedule_job(&self, key: &TriggerKey) -> Result<bool> {
        Scheduler::unschedule_job(self, key)
    }
}

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use syscheck_core::keys::{check_job_name, trigger_group, trigger_name, CHECK_TO_PERFORM_ID};
use syscheck_core::{Check, CheckTrigger};
use syscheck_scheduler::{GroupMatcher, JobDetail, JobKey, TriggerKey, DEFAULT_GROUP};
use syscheck_store::{RepositoryFactory, ResultRepository, TriggerRepository};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::schedule_store::ScheduleStore;
use crate::state::ReconcileState;
use crate::trigger::{build_trigger, TriggerBuildError};

/// Job type of every per-check job the reconciler creates.
pub const CHECK_JOB_TYPE: &str = "check-runner";

/// Mutation counts of one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub jobs_removed: usize,
    pub jobs_added: usize,
    pub triggers_removed: usize,
    pub triggers_rescheduled: usize,
    pub triggers_added: usize,
    /// Triggers left out because their row could not be turned into a live trigger.
    pub triggers_skipped: usize,
}

impl ReconcileReport {
    /// `true` when the pass changed nothing in the live schedule.
    pub fn is_noop(&self) -> bool {
        self.jobs_removed
            + self.jobs_added
            + self.triggers_removed
            + self.triggers_rescheduled
            + self.triggers_added
            == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another pass held the guard; nothing was read or changed.
    Skipped,
    Completed(ReconcileReport),
}

/// Converges the live schedule onto the enabled checks and triggers.
///
/// Check jobs live in the default group as `Check {id}`; their triggers live
/// in group `Check {id}` as `Trigger {id}`. Jobs in any other group are never
/// touched.
pub struct Reconciler {
    repos: Arc<dyn RepositoryFactory>,
    schedule: Arc<dyn ScheduleStore>,
    state: Arc<ReconcileState>,
}

impl Reconciler {
    pub fn new(
        repos: Arc<dyn RepositoryFactory>,
        schedule: Arc<dyn ScheduleStore>,
        state: Arc<ReconcileState>,
    ) -> Self {
        Self {
            repos,
            schedule,
            state,
        }
    }

    pub fn state(&self) -> &Arc<ReconcileState> {
        &self.state
    }

    /// Run one pass as of `now`.
    ///
    /// Blocking: reads the repositories synchronously. When another pass is
    /// in progress this returns [`ReconcileOutcome::Skipped`] without touching
    /// either side. The watermark only advances when the pass completes (or is
    /// skipped), so a failed pass is retried in full next time.
    pub fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileOutcome> {
        let Some(_guard) = self.state.try_begin() else {
            warn!("not running schedule update as one is already running");
            self.state.set_last_run_at(now);
            return Ok(ReconcileOutcome::Skipped);
        };

        let last_run_at = self.state.last_run_at();
        debug!(%last_run_at, %now, "schedule update starting");

        let report = self.run_pass(now, last_run_at)?;
        self.state.set_last_run_at(now);

        info!(
            jobs_removed = report.jobs_removed,
            jobs_added = report.jobs_added,
            triggers_removed = report.triggers_removed,
            triggers_rescheduled = report.triggers_rescheduled,
            triggers_added = report.triggers_added,
            triggers_skipped = report.triggers_skipped,
            "schedule update finished"
        );
        Ok(ReconcileOutcome::Completed(report))
    }

    fn run_pass(&self, now: DateTime<Utc>, last_run_at: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let enabled = self.repos.checks()?.list_enabled()?;
        let by_name: HashMap<String, &Check> = enabled
            .iter()
            .map(|c| (check_job_name(c.check_id), c))
            .collect();

        self.reconcile_jobs(&enabled, &by_name, last_run_at, &mut report)?;

        let triggers = self.repos.triggers()?;
        let results = self.repos.results()?;
        for (name, job_key) in self.check_jobs() {
            let Some(check) = by_name.get(&name) else {
                warn!(job = %job_key, "live job has no enabled check, leaving it for the next pass");
                continue;
            };
            self.reconcile_triggers(
                check,
                &job_key,
                triggers.as_ref(),
                results.as_ref(),
                now,
                last_run_at,
                &mut report,
            )?;
        }
        Ok(report)
    }

    /// Current check jobs by name.
    fn check_jobs(&self) -> BTreeMap<String, JobKey> {
        self.schedule
            .job_keys(&GroupMatcher::group_equals(DEFAULT_GROUP))
            .into_iter()
            .map(|k| (k.name.clone(), k))
            .collect()
    }

    /// Remove jobs whose check is gone, disabled or changed; add missing ones.
    ///
    /// A job that cannot be removed fails the pass. Its check row would
    /// otherwise fall behind the watermark and never be rebuilt.
    fn reconcile_jobs(
        &self,
        enabled: &[Check],
        by_name: &HashMap<String, &Check>,
        last_run_at: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let live = self.check_jobs();

        let to_remove: Vec<&JobKey> = live
            .iter()
            .filter(|(name, _)| match by_name.get(*name) {
                None => true,
                Some(check) => check.updated > last_run_at,
            })
            .map(|(_, key)| key)
            .collect();

        for key in to_remove {
            match self.schedule.delete_job(key) {
                Ok(true) => {
                    info!(job = %key, "removed job");
                    report.jobs_removed += 1;
                }
                Ok(false) => warn!(job = %key, "unable to find job to remove"),
                Err(e) => {
                    warn!(job = %key, error = %e, "failed to remove job");
                    return Err(e.into());
                }
            }
        }

        let live = self.check_jobs();
        for check in enabled {
            let name = check_job_name(check.check_id);
            if live.contains_key(&name) {
                continue;
            }
            let detail = JobDetail::new(JobKey::new(name), CHECK_JOB_TYPE)
                .with_description(check.system_name.clone())
                .with_data(CHECK_TO_PERFORM_ID, check.check_id)
                .store_durably();
            let key = detail.key.clone();
            match self.schedule.add_job(detail, false) {
                Ok(()) => {
                    info!(job = %key, system = %check.system_name, "added job");
                    report.jobs_added += 1;
                }
                Err(e) => warn!(job = %key, error = %e, "failed to add job"),
            }
        }
        Ok(())
    }

    /// Diff one check's live triggers against its enabled trigger rows.
    #[allow(clippy::too_many_arguments)]
    fn reconcile_triggers(
        &self,
        check: &Check,
        job_key: &JobKey,
        triggers: &dyn TriggerRepository,
        results: &dyn ResultRepository,
        now: DateTime<Utc>,
        last_run_at: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let rows = triggers.list_enabled_for_check(check.check_id)?;
        let wanted: HashMap<String, &CheckTrigger> = rows
            .iter()
            .map(|t| (trigger_name(t.trigger_id), t))
            .collect();

        let live: BTreeMap<String, TriggerKey> = self
            .schedule
            .trigger_keys(&GroupMatcher::group_equals(trigger_group(check.check_id)))
            .into_iter()
            .map(|k| (k.name.clone(), k))
            .collect();

        for (name, key) in &live {
            if wanted.contains_key(name) {
                continue;
            }
            match self.schedule.unschedule_job(key) {
                Ok(true) => {
                    info!(trigger = %key, "removed trigger");
                    report.triggers_removed += 1;
                }
                Ok(false) => warn!(trigger = %key, "unable to find trigger to remove"),
                Err(e) => warn!(trigger = %key, error = %e, "failed to remove trigger"),
            }
        }

        for row in &rows {
            let existing = live.get(&trigger_name(row.trigger_id));
            if existing.is_some() && row.updated <= last_run_at {
                continue;
            }

            let trigger = match build_trigger(row, job_key, now, results) {
                Ok(t) => t,
                Err(TriggerBuildError::InvalidCron(e)) => {
                    warn!(
                        trigger_id = row.trigger_id,
                        check_id = row.check_id,
                        cron = %row.cron_expression,
                        error = %e,
                        "skipping trigger with invalid cron expression"
                    );
                    report.triggers_skipped += 1;
                    if let Some(old) = existing {
                        self.drop_stale_trigger(old, report)?;
                    }
                    continue;
                }
                Err(TriggerBuildError::Repository(e)) => return Err(e.into()),
            };
            let key = trigger.key.clone();

            if let Some(old) = existing {
                match self.schedule.reschedule_job(old, trigger.clone()) {
                    Ok(Some(first_fire)) => {
                        info!(trigger = %key, %first_fire, "updated trigger");
                        report.triggers_rescheduled += 1;
                        continue;
                    }
                    Ok(None) => {
                        warn!(trigger = %key, "could not find trigger to update, adding it instead");
                    }
                    Err(e) => {
                        warn!(trigger = %key, error = %e, "failed to update trigger");
                        report.triggers_skipped += 1;
                        self.drop_stale_trigger(old, report)?;
                        continue;
                    }
                }
            }

            match self.schedule.schedule_job(trigger) {
                Ok(first_fire) => {
                    info!(trigger = %key, %first_fire, "added trigger");
                    report.triggers_added += 1;
                }
                Err(e) => {
                    warn!(trigger = %key, error = %e, "failed to add trigger");
                    report.triggers_skipped += 1;
                }
            }
        }
        Ok(())
    }

    /// Unschedule a live trigger whose changed row could not be applied.
    ///
    /// The trigger comes back through the add path once its row is fixed.
    /// Failing to remove it fails the pass so the row is retried.
    fn drop_stale_trigger(&self, old: &TriggerKey, report: &mut ReconcileReport) -> Result<()> {
        match self.schedule.unschedule_job(old) {
            Ok(true) => {
                info!(trigger = %old, "removed trigger with outdated schedule");
                report.triggers_removed += 1;
            }
            Ok(false) => debug!(trigger = %old, "outdated trigger already gone"),
            Err(e) => {
                warn!(trigger = %old, error = %e, "failed to remove outdated trigger");
                return Err(e.into());
            }
        }
        Ok(())
    }
}

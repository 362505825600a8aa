use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use syscheck_checks::CheckRegistry;
use syscheck_core::keys::CHECK_TO_PERFORM_ID;
use syscheck_core::{Check, CheckResult, NewCheckResult};
use syscheck_scheduler::{Job, JobExecutionContext, JobExecutionError};
use syscheck_store::RepositoryFactory;
use tracing::{debug, info, warn};

use crate::reconciler::{ReconcileOutcome, Reconciler};

/// Job type of the periodic reconciliation job.
pub const SCHEDULE_UPDATER_JOB_TYPE: &str = "schedule-updater";

/// Runs one reconciliation pass per firing.
pub struct ScheduleUpdaterJob {
    reconciler: Arc<Reconciler>,
}

impl ScheduleUpdaterJob {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl Job for ScheduleUpdaterJob {
    async fn execute(&self, _ctx: &JobExecutionContext) -> Result<(), JobExecutionError> {
        let reconciler = Arc::clone(&self.reconciler);
        let outcome = tokio::task::spawn_blocking(move || reconciler.reconcile(Utc::now()))
            .await
            .map_err(|e| JobExecutionError::Panicked(e.to_string()))?
            .map_err(|e| JobExecutionError::Failed(e.to_string()))?;

        if let ReconcileOutcome::Completed(report) = outcome {
            debug!(?report, "reconciliation pass complete");
        }
        Ok(())
    }
}

/// Performs the check named by the job's `CheckToPerformId` and appends the result.
pub struct ScheduledCheckJob {
    repos: Arc<dyn RepositoryFactory>,
    registry: Arc<CheckRegistry>,
}

impl ScheduledCheckJob {
    pub fn new(repos: Arc<dyn RepositoryFactory>, registry: Arc<CheckRegistry>) -> Self {
        Self { repos, registry }
    }

    async fn load(&self, check_id: i64) -> Result<(Option<Check>, Option<CheckResult>), JobExecutionError> {
        let repos = Arc::clone(&self.repos);
        tokio::task::spawn_blocking(move || -> syscheck_store::Result<_> {
            let check = repos.checks()?.get(check_id)?;
            let last = repos.results()?.last_for_check(check_id)?;
            Ok((check, last))
        })
        .await
        .map_err(|e| JobExecutionError::Panicked(e.to_string()))?
        .map_err(|e| JobExecutionError::Failed(format!("loading check {check_id}: {e}")))
    }

    async fn record(&self, result: NewCheckResult) -> Result<CheckResult, JobExecutionError> {
        let repos = Arc::clone(&self.repos);
        let check_id = result.check_id;
        tokio::task::spawn_blocking(move || -> syscheck_store::Result<CheckResult> {
            repos.results()?.insert(&result)
        })
        .await
        .map_err(|e| JobExecutionError::Panicked(e.to_string()))?
        .map_err(|e| JobExecutionError::Failed(format!("saving result for check {check_id}: {e}")))
    }
}

#[async_trait]
impl Job for ScheduledCheckJob {
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobExecutionError> {
        let check_id = ctx.job_detail.data_i64(CHECK_TO_PERFORM_ID).ok_or_else(|| {
            JobExecutionError::Configuration(format!(
                "job {} has no {CHECK_TO_PERFORM_ID}",
                ctx.job_detail.key
            ))
        })?;

        let (check, last) = self.load(check_id).await?;
        let check = check.ok_or_else(|| JobExecutionError::Failed(format!("check {check_id} no longer exists")))?;

        let executor = self.registry.get(&check.check_type).ok_or_else(|| {
            JobExecutionError::Configuration(format!(
                "no executor registered for check type {:?}",
                check.check_type
            ))
        })?;

        let outcome = executor.perform(&check, last.as_ref()).await;
        if !outcome.status.is_success() {
            warn!(
                check_id,
                system = %check.system_name,
                status = %outcome.status,
                detail = outcome.failure_detail.as_deref().unwrap_or(""),
                "check did not pass"
            );
        }

        let saved = self
            .record(NewCheckResult {
                check_id,
                check_dts: ctx.fire_time,
                status: outcome.status,
                failure_detail: outcome.failure_detail,
                run_data: outcome.run_data.map(|v| v.to_string()),
            })
            .await?;
        info!(
            check_id,
            result_id = saved.result_id,
            status = %saved.status,
            "check result recorded"
        );
        Ok(())
    }
}

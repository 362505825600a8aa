use std::sync::Arc;

use chrono::Utc;
use syscheck_checks::CheckRegistry;
use syscheck_core::config::SyscheckConfig;
use syscheck_scheduler::{
    GroupMatcher, Job, JobDetail, JobExecutionError, JobKey, MisfirePolicy, Result, Scheduler,
    SchedulerSettings, Trigger, TriggerKey,
};
use syscheck_store::RepositoryFactory;
use tracing::info;

use crate::jobs::{ScheduleUpdaterJob, ScheduledCheckJob, SCHEDULE_UPDATER_JOB_TYPE};
use crate::listener::JobFailureListener;
use crate::reconciler::{Reconciler, CHECK_JOB_TYPE};
use crate::schedule_store::ScheduleStore;
use crate::state::ReconcileState;

pub const UPDATER_GROUP: &str = "Updater";
pub const UPDATER_JOB_NAME: &str = "ScheduleUpdater";
pub const UPDATER_TRIGGER_NAME: &str = "TriggerScheduleUpdater";

/// Owns the engine and wires the reconciler, check jobs and failure listener into it.
pub struct SystemCheckerRunner {
    scheduler: Scheduler,
    reconciler: Arc<Reconciler>,
    reconcile_cron: String,
    run_on_start: bool,
}

impl SystemCheckerRunner {
    /// Build the engine and register job factories. Nothing fires until [`start`](Self::start).
    pub fn new(config: &SyscheckConfig, repos: Arc<dyn RepositoryFactory>, registry: CheckRegistry) -> Self {
        let scheduler = Scheduler::new(SchedulerSettings::from(&config.scheduler));
        let schedule: Arc<dyn ScheduleStore> = Arc::new(scheduler.clone());
        let state = Arc::new(ReconcileState::new(Utc::now()));
        let reconciler = Arc::new(Reconciler::new(Arc::clone(&repos), schedule, state));

        scheduler.add_job_listener(Arc::new(JobFailureListener), GroupMatcher::AnyGroup);

        let updater = Arc::clone(&reconciler);
        scheduler.register_job_factory(
            SCHEDULE_UPDATER_JOB_TYPE,
            Arc::new(move |_: &JobDetail| -> std::result::Result<Arc<dyn Job>, JobExecutionError> {
                Ok(Arc::new(ScheduleUpdaterJob::new(Arc::clone(&updater))))
            }),
        );

        let registry = Arc::new(registry);
        scheduler.register_job_factory(
            CHECK_JOB_TYPE,
            Arc::new(move |_: &JobDetail| -> std::result::Result<Arc<dyn Job>, JobExecutionError> {
                Ok(Arc::new(ScheduledCheckJob::new(Arc::clone(&repos), Arc::clone(&registry))))
            }),
        );

        Self {
            scheduler,
            reconciler,
            reconcile_cron: config.reconciler.cron.clone(),
            run_on_start: config.reconciler.run_on_start,
        }
    }

    /// Schedule the reconciliation job on its cron, start the engine and,
    /// when configured, fire one pass immediately. Must run inside a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let job_key = JobKey::with_group(UPDATER_JOB_NAME, UPDATER_GROUP);
        let detail = JobDetail::new(job_key.clone(), SCHEDULE_UPDATER_JOB_TYPE)
            .with_description("Schedule updater")
            .store_durably();
        let trigger = Trigger::cron(
            TriggerKey::with_group(UPDATER_TRIGGER_NAME, UPDATER_GROUP),
            job_key.clone(),
            self.reconcile_cron.clone(),
        )
        .with_misfire(MisfirePolicy::DoNothing);

        let first = self.scheduler.schedule_job_with_detail(detail, trigger)?;
        self.scheduler.start()?;
        info!(cron = %self.reconcile_cron, first_update = %first, "system checker started");

        if self.run_on_start {
            self.scheduler.trigger_job(&job_key)?;
        }
        Ok(())
    }

    /// Stop firing and wait for in-flight executions.
    pub async fn stop(&self) {
        self.scheduler.shutdown(true).await;
        info!("system checker stopped");
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }
}

use syscheck_scheduler::{JobExecutionContext, JobExecutionError, JobListener};
use tracing::{error, info};

/// Logs every job execution across all groups: failures at error level,
/// completions at info level.
///
/// The engine never retries; this is the single place failures surface.
#[derive(Debug, Default)]
pub struct JobFailureListener;

impl JobListener for JobFailureListener {
    fn name(&self) -> &str {
        "MainJobListener"
    }

    fn job_was_executed(&self, ctx: &JobExecutionContext, error: Option<&JobExecutionError>) {
        let job = ctx.job_detail.display_name();
        match error {
            Some(e) => error!(
                %job,
                trigger = %ctx.trigger_key,
                fire_id = %ctx.fire_instance_id,
                error = %e,
                "job errored"
            ),
            None => info!(%job, fire_id = %ctx.fire_instance_id, "job executed"),
        }
    }
}

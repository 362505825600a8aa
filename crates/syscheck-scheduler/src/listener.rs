use crate::error::JobExecutionError;
use crate::job::JobExecutionContext;

/// Observer of job executions.
///
/// Callbacks run on the executing task right before and after the job, so
/// they must be cheap and must not block. A panicking listener is logged and
/// otherwise ignored.
pub trait JobListener: Send + Sync {
    fn name(&self) -> &str;

    fn job_to_be_executed(&self, _ctx: &JobExecutionContext) {}

    /// Called after every execution. `error` is `None` on success.
    fn job_was_executed(&self, ctx: &JobExecutionContext, error: Option<&JobExecutionError>);
}

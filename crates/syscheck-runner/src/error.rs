use syscheck_scheduler::SchedulerError;
use syscheck_store::StoreError;
use thiserror::Error;

/// A reconciliation pass that could not complete.
///
/// Partial data problems (one bad cron expression, one trigger missing at
/// update time) never surface here; they are logged and skipped.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Reading desired state failed.
    #[error("Repository error: {0}")]
    Repository(#[from] StoreError),

    /// The scheduler refused an operation the pass cannot continue without.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

pub type Result<T> = std::result::Result<T, ReconcileError>;

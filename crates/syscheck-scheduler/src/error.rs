use thiserror::Error;

use crate::types::{JobKey, TriggerKey};

/// Errors returned by the scheduler's management API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The provided schedule definition is invalid or can never fire.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// No job with the given key exists in the store.
    #[error("Job not found: {key}")]
    JobNotFound { key: JobKey },

    #[error("Job already exists: {key}")]
    JobAlreadyExists { key: JobKey },

    #[error("Trigger already exists: {key}")]
    TriggerAlreadyExists { key: TriggerKey },

    /// Jobs stored without a trigger must be durable.
    #[error("Job {key} is not durable and has no trigger")]
    NonDurableJob { key: JobKey },

    /// The scheduler has been shut down and cannot be restarted.
    #[error("Scheduler is shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why a job execution did not complete successfully.
///
/// Delivered to every matching [`crate::JobListener`]; never retried by the
/// engine.
#[derive(Debug, Clone, Error)]
pub enum JobExecutionError {
    /// The job could not be built or is missing required collaborators/data.
    #[error("Job configuration error: {0}")]
    Configuration(String),

    /// The job ran and reported failure.
    #[error("Job failed: {0}")]
    Failed(String),

    /// The job task panicked.
    #[error("Job panicked: {0}")]
    Panicked(String),
}

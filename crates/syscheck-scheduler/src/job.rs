use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::JobExecutionError;
use crate::types::{JobDataMap, JobDetail, TriggerKey};

/// Everything a job execution knows about why and when it fired.
#[derive(Debug, Clone)]
pub struct JobExecutionContext {
    /// Unique per firing, for log correlation.
    pub fire_instance_id: Uuid,
    pub job_detail: JobDetail,
    pub trigger_key: TriggerKey,
    pub trigger_data: JobDataMap,
    /// When the trigger was due.
    pub scheduled_fire_time: DateTime<Utc>,
    /// When the engine actually fired it (later than scheduled on misfire).
    pub fire_time: DateTime<Utc>,
}

/// A unit of work fired by the engine.
#[async_trait]
pub trait Job: Send + Sync {
    async fn execute(&self, ctx: &JobExecutionContext) -> Result<(), JobExecutionError>;
}

/// Builds a fresh job instance for every firing of a given job type.
///
/// Collaborators are injected here, typed, instead of being looked up by
/// string key from a shared context at execution time.
pub trait JobFactory: Send + Sync {
    fn new_job(&self, detail: &JobDetail) -> Result<Arc<dyn Job>, JobExecutionError>;
}

impl<F> JobFactory for F
where
    F: Fn(&JobDetail) -> Result<Arc<dyn Job>, JobExecutionError> + Send + Sync,
{
    fn new_job(&self, detail: &JobDetail) -> Result<Arc<dyn Job>, JobExecutionError> {
        self(detail)
    }
}

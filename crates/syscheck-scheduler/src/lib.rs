//! `syscheck-scheduler` — Tokio-based job/trigger engine.
//!
//! # Overview
//!
//! Jobs ([`JobDetail`]) and triggers ([`Trigger`]) live in an in-memory store
//! keyed by `(group, name)` identities. The [`Scheduler`] loop polls the store
//! on a fixed tick, hands every due firing to the worker pool, and reports the
//! outcome of each execution to registered [`JobListener`]s.
//!
//! Job instances are created per firing by the [`JobFactory`] registered for
//! the job's `job_type`, so collaborators are injected with their real types.
//!
//! # Schedule variants
//!
//! | Variant | Behaviour                                               |
//! |---------|---------------------------------------------------------|
//! | `Once`  | Single fire at an absolute UTC instant                  |
//! | `Cron`  | Quartz-style cron expression (6 or 7 fields, `?` allowed) |
//!
//! # Misfires
//!
//! A firing overdue by more than the misfire threshold follows the trigger's
//! [`MisfirePolicy`]: fire once now and resume, or skip to the next slot.

pub mod engine;
pub mod error;
pub mod job;
pub mod listener;
pub mod schedule;
mod store;
pub mod types;

pub use engine::{Scheduler, SchedulerSettings, MANUAL_TRIGGER_GROUP};
pub use error::{JobExecutionError, Result, SchedulerError};
pub use job::{Job, JobExecutionContext, JobFactory};
pub use listener::JobListener;
pub use schedule::CronSchedule;
pub use types::{
    GroupMatcher, JobDataMap, JobDetail, JobKey, MisfirePolicy, Schedule, Trigger, TriggerKey,
    DEFAULT_GROUP,
};

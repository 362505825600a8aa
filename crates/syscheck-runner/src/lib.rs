//! `syscheck-runner` — keeps the live schedule in step with the check tables.
//!
//! The [`Reconciler`] diffs enabled checks and triggers against the jobs and
//! triggers the engine currently holds and applies the minimal set of
//! removals, updates and additions. [`SystemCheckerRunner`] wires it into a
//! [`syscheck_scheduler::Scheduler`] as a periodic job alongside one job per
//! check.

pub mod error;
pub mod jobs;
pub mod listener;
pub mod reconciler;
pub mod runner;
pub mod schedule_store;
pub mod state;
pub mod trigger;

pub use error::{ReconcileError, Result};
pub use jobs::{ScheduleUpdaterJob, ScheduledCheckJob, SCHEDULE_UPDATER_JOB_TYPE};
pub use listener::JobFailureListener;
pub use reconciler::{ReconcileOutcome, ReconcileReport, Reconciler, CHECK_JOB_TYPE};
pub use runner::SystemCheckerRunner;
pub use schedule_store::ScheduleStore;
pub use state::ReconcileState;
pub use trigger::{build_trigger, start_time, TriggerBuildError, CATCH_UP_EPSILON_SECS};

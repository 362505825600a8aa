// Shared fixtures: in-memory repositories and a call-recording schedule.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use syscheck_core::{Check, CheckResult, CheckTrigger, NewCheckResult, SuccessStatus};
use syscheck_runner::{ReconcileState, Reconciler, ScheduleStore};
use syscheck_scheduler::{
    GroupMatcher, JobDetail, JobKey, Scheduler, SchedulerError, SchedulerSettings, Trigger,
    TriggerKey,
};
use syscheck_store::{
    CheckRepository, RepositoryFactory, ResultRepository, StoreError, TriggerRepository,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

#[derive(Default)]
struct Tables {
    checks: Vec<Check>,
    triggers: Vec<CheckTrigger>,
    results: Vec<CheckResult>,
}

/// Desired state held in memory. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryRepos {
    tables: Arc<Mutex<Tables>>,
    fail_next_list: Arc<AtomicBool>,
    /// (entered, release): the next `list_enabled` signals `entered` then
    /// blocks until `release` receives.
    gate: Arc<Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>>,
}

impl MemoryRepos {
    pub fn add_check(&self, check_id: i64, system_name: &str, check_type: &str, updated: DateTime<Utc>) {
        self.tables.lock().unwrap().checks.push(Check {
            check_id,
            system_name: system_name.into(),
            check_type: check_type.into(),
            settings: serde_json::Value::Null,
            enabled: true,
            updated,
        });
    }

    pub fn edit_check(&self, check_id: i64, edit: impl FnOnce(&mut Check)) {
        let mut tables = self.tables.lock().unwrap();
        let check = tables
            .checks
            .iter_mut()
            .find(|c| c.check_id == check_id)
            .expect("check exists");
        edit(check);
    }

    pub fn add_trigger(
        &self,
        trigger_id: i64,
        check_id: i64,
        cron: &str,
        perform_catch_up: bool,
        updated: DateTime<Utc>,
    ) {
        self.tables.lock().unwrap().triggers.push(CheckTrigger {
            trigger_id,
            check_id,
            cron_expression: cron.into(),
            perform_catch_up,
            enabled: true,
            updated,
        });
    }

    pub fn edit_trigger(&self, trigger_id: i64, edit: impl FnOnce(&mut CheckTrigger)) {
        let mut tables = self.tables.lock().unwrap();
        let trigger = tables
            .triggers
            .iter_mut()
            .find(|t| t.trigger_id == trigger_id)
            .expect("trigger exists");
        edit(trigger);
    }

    pub fn add_result(&self, check_id: i64, check_dts: DateTime<Utc>) {
        let result = NewCheckResult {
            check_id,
            check_dts,
            status: SuccessStatus::Success,
            failure_detail: None,
            run_data: None,
        };
        self.push_result(&result);
    }

    pub fn results_for(&self, check_id: i64) -> Vec<CheckResult> {
        self.tables
            .lock()
            .unwrap()
            .results
            .iter()
            .filter(|r| r.check_id == check_id)
            .cloned()
            .collect()
    }

    pub fn fail_next_list(&self) {
        self.fail_next_list.store(true, Ordering::SeqCst);
    }

    /// Make the next `list_enabled` call block. Returns (entered, release).
    pub fn arm_gate(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((entered_tx, release_rx));
        (entered_rx, release_tx)
    }

    fn push_result(&self, result: &NewCheckResult) -> CheckResult {
        let mut tables = self.tables.lock().unwrap();
        let saved = CheckResult {
            result_id: tables.results.len() as i64 + 1,
            check_id: result.check_id,
            check_dts: result.check_dts,
            status: result.status,
            failure_detail: result.failure_detail.clone(),
            run_data: result.run_data.clone(),
        };
        tables.results.push(saved.clone());
        saved
    }
}

struct View(MemoryRepos);

impl CheckRepository for View {
    fn list_enabled(&self) -> syscheck_store::Result<Vec<Check>> {
        let gate = self.0.gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        if self.0.fail_next_list.swap(false, Ordering::SeqCst) {
            return Err(StoreError::NotFound { entity: "check", id: 0 });
        }
        let tables = self.0.tables.lock().unwrap();
        Ok(tables.checks.iter().filter(|c| c.enabled).cloned().collect())
    }

    fn get(&self, check_id: i64) -> syscheck_store::Result<Option<Check>> {
        let tables = self.0.tables.lock().unwrap();
        Ok(tables.checks.iter().find(|c| c.check_id == check_id).cloned())
    }
}

impl TriggerRepository for View {
    fn list_enabled_for_check(&self, check_id: i64) -> syscheck_store::Result<Vec<CheckTrigger>> {
        let tables = self.0.tables.lock().unwrap();
        Ok(tables
            .triggers
            .iter()
            .filter(|t| t.enabled && t.check_id == check_id)
            .cloned()
            .collect())
    }
}

impl ResultRepository for View {
    fn last_for_check(&self, check_id: i64) -> syscheck_store::Result<Option<CheckResult>> {
        Ok(self.0.results_for(check_id).pop())
    }

    fn insert(&self, result: &NewCheckResult) -> syscheck_store::Result<CheckResult> {
        Ok(self.0.push_result(result))
    }
}

impl RepositoryFactory for MemoryRepos {
    fn checks(&self) -> syscheck_store::Result<Box<dyn CheckRepository>> {
        Ok(Box::new(View(self.clone())))
    }

    fn triggers(&self) -> syscheck_store::Result<Box<dyn TriggerRepository>> {
        Ok(Box::new(View(self.clone())))
    }

    fn results(&self) -> syscheck_store::Result<Box<dyn ResultRepository>> {
        Ok(Box::new(View(self.clone())))
    }
}

/// Delegates to a real engine and records every call.
pub struct RecordingSchedule {
    pub inner: Scheduler,
    mutations: Mutex<Vec<String>>,
    reads: AtomicUsize,
    lose_before_reschedule: AtomicBool,
    fail_next_delete: AtomicBool,
}

impl RecordingSchedule {
    pub fn new(inner: Scheduler) -> Self {
        Self {
            inner,
            mutations: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            lose_before_reschedule: AtomicBool::new(false),
            fail_next_delete: AtomicBool::new(false),
        }
    }

    /// Mutating calls since the last `take_mutations`.
    pub fn take_mutations(&self) -> Vec<String> {
        std::mem::take(&mut *self.mutations.lock().unwrap())
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Have the next reschedule find its old trigger already gone.
    pub fn lose_trigger_before_reschedule(&self) {
        self.lose_before_reschedule.store(true, Ordering::SeqCst);
    }

    /// Have the next `delete_job` fail as if the engine had shut down.
    pub fn fail_next_delete(&self) {
        self.fail_next_delete.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: String) {
        self.mutations.lock().unwrap().push(call);
    }
}

impl ScheduleStore for RecordingSchedule {
    fn job_keys(&self, matcher: &GroupMatcher) -> Vec<JobKey> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.job_keys(matcher)
    }

    fn trigger_keys(&self, matcher: &GroupMatcher) -> Vec<TriggerKey> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.trigger_keys(matcher)
    }

    fn add_job(&self, detail: JobDetail, replace: bool) -> syscheck_scheduler::Result<()> {
        self.record(format!("add_job {}", detail.key));
        self.inner.add_job(detail, replace)
    }

    fn delete_job(&self, key: &JobKey) -> syscheck_scheduler::Result<bool> {
        self.record(format!("delete_job {key}"));
        if self.fail_next_delete.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::Shutdown);
        }
        self.inner.delete_job(key)
    }

    fn schedule_job(&self, trigger: Trigger) -> syscheck_scheduler::Result<DateTime<Utc>> {
        self.record(format!("schedule_job {}", trigger.key));
        self.inner.schedule_job(trigger)
    }

    fn reschedule_job(
        &self,
        old: &TriggerKey,
        new: Trigger,
    ) -> syscheck_scheduler::Result<Option<DateTime<Utc>>> {
        self.record(format!("reschedule_job {old}"));
        if self.lose_before_reschedule.swap(false, Ordering::SeqCst) {
            self.inner.unschedule_job(old)?;
        }
        self.inner.reschedule_job(old, new)
    }

    fn unschedule_job(&self, key: &TriggerKey) -> syscheck_scheduler::Result<bool> {
        self.record(format!("unschedule_job {key}"));
        self.inner.unschedule_job(key)
    }
}

pub struct Harness {
    pub repos: MemoryRepos,
    pub schedule: Arc<RecordingSchedule>,
    pub state: Arc<ReconcileState>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    /// Reconciler over empty tables and an unstarted engine, watermark at [`t0`].
    pub fn new() -> Self {
        let repos = MemoryRepos::default();
        let schedule = Arc::new(RecordingSchedule::new(Scheduler::new(SchedulerSettings::default())));
        let state = Arc::new(ReconcileState::new(t0()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(repos.clone()),
            Arc::clone(&schedule) as Arc<dyn ScheduleStore>,
            Arc::clone(&state),
        ));
        Self {
            repos,
            schedule,
            state,
            reconciler,
        }
    }

    pub fn engine(&self) -> &Scheduler {
        &self.schedule.inner
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engine()
            .job_keys(&GroupMatcher::AnyGroup)
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        names.sort();
        names
    }

    pub fn trigger_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engine()
            .trigger_keys(&GroupMatcher::AnyGroup)
            .into_iter()
            .map(|k| k.to_string())
            .collect();
        names.sort();
        names
    }
}

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use syscheck_core::config::SchedulerConfig;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::{JobExecutionError, Result, SchedulerError},
    job::{JobExecutionContext, JobFactory},
    listener::JobListener,
    store::{FiredTrigger, JobStore},
    types::{GroupMatcher, JobDetail, JobKey, Trigger, TriggerKey},
};

/// Group of the one-shot triggers created by [`Scheduler::trigger_job`].
pub const MANUAL_TRIGGER_GROUP: &str = "MANUAL_TRIGGER";

/// Engine tuning, usually derived from [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_concurrent_jobs: usize,
    pub misfire_threshold: Duration,
    pub tick: std::time::Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs.max(1),
            misfire_threshold: Duration::seconds(config.misfire_threshold_secs as i64),
            tick: std::time::Duration::from_millis(config.tick_millis.max(10)),
        }
    }
}

struct Inner {
    store: Mutex<JobStore>,
    factories: DashMap<String, Arc<dyn JobFactory>>,
    listeners: RwLock<Vec<(GroupMatcher, Arc<dyn JobListener>)>>,
    settings: SchedulerSettings,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    shutdown_tx: watch::Sender<bool>,
    started: AtomicBool,
    shut_down: AtomicBool,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// In-process job/trigger scheduler.
///
/// Cheap to clone: every clone is a handle onto the same engine. Management
/// calls are synchronous and may be made from any thread; firing happens on
/// the Tokio runtime that called [`Scheduler::start`]. Jobs run concurrently,
/// bounded by `max_concurrent_jobs`.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(settings: SchedulerSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                store: Mutex::new(JobStore::default()),
                factories: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
                permits: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
                settings,
                tracker: TaskTracker::new(),
                shutdown_tx,
                started: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                loop_handle: Mutex::new(None),
            }),
        }
    }

    // --- wiring ------------------------------------------------------------

    /// Register the factory that builds jobs of `job_type`. Replaces any
    /// previous factory for the same type.
    pub fn register_job_factory(&self, job_type: impl Into<String>, factory: Arc<dyn JobFactory>) {
        let job_type = job_type.into();
        debug!(%job_type, "job factory registered");
        self.inner.factories.insert(job_type, factory);
    }

    /// Attach a listener to every job whose group matches `matcher`.
    pub fn add_job_listener(&self, listener: Arc<dyn JobListener>, matcher: GroupMatcher) {
        debug!(listener = listener.name(), ?matcher, "job listener added");
        self.inner
            .listeners
            .write()
            .expect("listener registry poisoned")
            .push((matcher, listener));
    }

    // --- job / trigger management -----------------------------------------

    /// Store a job without a trigger. The job must be durable.
    pub fn add_job(&self, detail: JobDetail, replace: bool) -> Result<()> {
        let key = detail.key.clone();
        self.store().add_job(detail, replace)?;
        debug!(job = %key, "job added");
        Ok(())
    }

    /// Remove a job and all of its triggers. Returns `false` if it did not exist.
    pub fn delete_job(&self, key: &JobKey) -> Result<bool> {
        let removed = self.store().delete_job(key);
        if removed {
            debug!(job = %key, "job deleted");
        }
        Ok(removed)
    }

    /// Add a trigger for an existing job. Returns the first fire time.
    pub fn schedule_job(&self, trigger: Trigger) -> Result<DateTime<Utc>> {
        let key = trigger.key.clone();
        let first = self.store().store_trigger(trigger)?;
        debug!(trigger = %key, first_fire = %first, "trigger scheduled");
        Ok(first)
    }

    /// Add a job together with its first trigger.
    pub fn schedule_job_with_detail(&self, detail: JobDetail, trigger: Trigger) -> Result<DateTime<Utc>> {
        let key = detail.key.clone();
        let first = self.store().add_job_with_trigger(detail, trigger)?;
        debug!(job = %key, first_fire = %first, "job scheduled");
        Ok(first)
    }

    /// Replace trigger `old` with `new`, bound to the same job.
    ///
    /// Returns `Ok(None)` when `old` is not scheduled; nothing is changed then.
    pub fn reschedule_job(&self, old: &TriggerKey, new: Trigger) -> Result<Option<DateTime<Utc>>> {
        let first = self.store().replace_trigger(old, new)?;
        if let Some(first) = first {
            debug!(trigger = %old, first_fire = %first, "trigger rescheduled");
        }
        Ok(first)
    }

    /// Remove a trigger. Returns `false` if it did not exist.
    pub fn unschedule_job(&self, key: &TriggerKey) -> Result<bool> {
        let removed = self.store().remove_trigger(key).is_some();
        if removed {
            debug!(trigger = %key, "trigger unscheduled");
        }
        Ok(removed)
    }

    pub fn get_job_detail(&self, key: &JobKey) -> Option<JobDetail> {
        self.store().job(key).cloned()
    }

    pub fn get_trigger(&self, key: &TriggerKey) -> Option<Trigger> {
        self.store().trigger(key).cloned()
    }

    pub fn job_keys(&self, matcher: &GroupMatcher) -> Vec<JobKey> {
        self.store().job_keys(matcher)
    }

    pub fn trigger_keys(&self, matcher: &GroupMatcher) -> Vec<TriggerKey> {
        self.store().trigger_keys(matcher)
    }

    /// Fire `key` once, as soon as the engine loop next runs.
    pub fn trigger_job(&self, key: &JobKey) -> Result<()> {
        let trigger = Trigger::once(
            TriggerKey::with_group(format!("MT_{}", Uuid::new_v4().simple()), MANUAL_TRIGGER_GROUP),
            key.clone(),
            Utc::now(),
        );
        self.schedule_job(trigger)?;
        info!(job = %key, "job triggered on demand");
        Ok(())
    }

    // --- lifecycle ---------------------------------------------------------

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Spawn the engine loop on the current Tokio runtime. Idempotent.
    pub fn start(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(SchedulerError::Shutdown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let engine = self.clone();
        let shutdown = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move { engine.run(shutdown).await });
        *self
            .inner
            .loop_handle
            .lock()
            .expect("scheduler loop handle poisoned") = Some(handle);
        Ok(())
    }

    /// Stop firing triggers. With `wait_for_jobs`, also wait until every
    /// in-flight execution has finished.
    pub async fn shutdown(&self, wait_for_jobs: bool) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(wait_for_jobs, "scheduler shutting down");
        let _ = self.inner.shutdown_tx.send(true);

        let handle = self
            .inner
            .loop_handle
            .lock()
            .expect("scheduler loop handle poisoned")
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("scheduler loop ended abnormally: {e}");
            }
        }

        self.inner.tracker.close();
        if wait_for_jobs {
            self.inner.tracker.wait().await;
        }
        // Factories may hold handles back onto this engine.
        self.inner.factories.clear();
        info!("scheduler shut down");
    }

    // --- private helpers ---------------------------------------------------

    fn store(&self) -> MutexGuard<'_, JobStore> {
        self.inner.store.lock().expect("job store poisoned")
    }

    /// Main event loop. Polls every tick until `shutdown` broadcasts `true`.
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            max_concurrent_jobs = self.inner.settings.max_concurrent_jobs,
            "scheduler engine started"
        );
        let mut interval = tokio::time::interval(self.inner.settings.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(Utc::now()),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler engine stopped");
    }

    /// Fire every trigger due at `now`.
    fn tick(&self, now: DateTime<Utc>) {
        let fired = self
            .store()
            .acquire_due(now, self.inner.settings.misfire_threshold);
        for firing in fired {
            self.dispatch(firing);
        }
    }

    /// Run one firing on the worker pool.
    fn dispatch(&self, firing: FiredTrigger) {
        let ctx = JobExecutionContext {
            fire_instance_id: Uuid::new_v4(),
            job_detail: firing.job,
            trigger_key: firing.trigger_key,
            trigger_data: firing.trigger_data,
            scheduled_fire_time: firing.scheduled_fire_time,
            fire_time: firing.fire_time,
        };
        let engine = self.clone();
        let permits = Arc::clone(&self.inner.permits);
        self.inner.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!(job = %ctx.job_detail.key, "worker pool closed, firing dropped");
                return;
            };
            engine.execute(ctx).await;
        });
    }

    async fn execute(&self, ctx: JobExecutionContext) {
        debug!(
            job = %ctx.job_detail.key,
            trigger = %ctx.trigger_key,
            fire_instance = %ctx.fire_instance_id,
            "executing job"
        );
        let outcome = self.run_job(&ctx).await;
        self.notify(&ctx, |listener| {
            listener.job_was_executed(&ctx, outcome.as_ref().err())
        });
    }

    async fn run_job(&self, ctx: &JobExecutionContext) -> std::result::Result<(), JobExecutionError> {
        let factory = self
            .inner
            .factories
            .get(&ctx.job_detail.job_type)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| {
                JobExecutionError::Configuration(format!(
                    "no job factory registered for job type {:?}",
                    ctx.job_detail.job_type
                ))
            })?;
        let job = factory.new_job(&ctx.job_detail)?;

        self.notify(ctx, |listener| listener.job_to_be_executed(ctx));

        // Run on its own task so a panicking job surfaces as an error.
        let task_ctx = ctx.clone();
        match tokio::spawn(async move { job.execute(&task_ctx).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(JobExecutionError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(JobExecutionError::Failed(e.to_string())),
        }
    }

    fn notify(&self, ctx: &JobExecutionContext, call: impl Fn(&dyn JobListener)) {
        let listeners: Vec<Arc<dyn JobListener>> = self
            .inner
            .listeners
            .read()
            .expect("listener registry poisoned")
            .iter()
            .filter(|(matcher, _)| matcher.matches(&ctx.job_detail.key.group))
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))).is_err() {
                error!(listener = listener.name(), "job listener panicked");
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl Job for Counting {
        async fn execute(&self, _ctx: &JobExecutionContext) -> std::result::Result<(), JobExecutionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Job for Panicking {
        async fn execute(&self, _ctx: &JobExecutionContext) -> std::result::Result<(), JobExecutionError> {
            panic!("boom");
        }
    }

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<(String, Option<String>)>>,
    }

    impl JobListener for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn job_was_executed(&self, ctx: &JobExecutionContext, error: Option<&JobExecutionError>) {
            self.outcomes
                .lock()
                .unwrap()
                .push((ctx.job_detail.key.name.clone(), error.map(|e| e.to_string())));
        }
    }

    fn fast_settings() -> SchedulerSettings {
        SchedulerSettings {
            max_concurrent_jobs: 4,
            misfire_threshold: Duration::seconds(60),
            tick: std::time::Duration::from_millis(10),
        }
    }

    async fn wait_for(recorder: &Recorder, count: usize) {
        for _ in 0..200 {
            if recorder.outcomes.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("listener did not observe {count} executions");
    }

    #[tokio::test]
    async fn triggered_job_runs_and_is_reported() {
        let scheduler = Scheduler::new(fast_settings());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        scheduler.register_job_factory(
            "counting",
            Arc::new(move |_: &JobDetail| -> std::result::Result<Arc<dyn Job>, JobExecutionError> {
                Ok(Arc::new(Counting(Arc::clone(&counter))))
            }),
        );
        let recorder = Arc::new(Recorder::default());
        scheduler.add_job_listener(recorder.clone(), GroupMatcher::AnyGroup);

        let key = JobKey::new("count");
        scheduler
            .add_job(JobDetail::new(key.clone(), "counting").store_durably(), false)
            .unwrap();
        scheduler.start().unwrap();
        scheduler.trigger_job(&key).unwrap();

        wait_for(&recorder, 1).await;
        scheduler.shutdown(true).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.outcomes.lock().unwrap()[0], ("count".to_string(), None));
        // The manual trigger is exhausted; the durable job stays.
        assert!(scheduler
            .trigger_keys(&GroupMatcher::group_equals(MANUAL_TRIGGER_GROUP))
            .is_empty());
        assert!(scheduler.get_job_detail(&key).is_some());
    }

    #[tokio::test]
    async fn unknown_job_type_is_a_configuration_error() {
        let scheduler = Scheduler::new(fast_settings());
        let recorder = Arc::new(Recorder::default());
        scheduler.add_job_listener(recorder.clone(), GroupMatcher::AnyGroup);
        let key = JobKey::new("orphan");
        scheduler
            .add_job(JobDetail::new(key.clone(), "unregistered").store_durably(), false)
            .unwrap();
        scheduler.start().unwrap();
        scheduler.trigger_job(&key).unwrap();

        wait_for(&recorder, 1).await;
        scheduler.shutdown(true).await;

        let outcomes = recorder.outcomes.lock().unwrap();
        let err = outcomes[0].1.as_deref().expect("error reported");
        assert!(err.contains("configuration"), "{err}");
    }

    #[tokio::test]
    async fn panicking_job_is_reported_not_propagated() {
        let scheduler = Scheduler::new(fast_settings());
        scheduler.register_job_factory(
            "panics",
            Arc::new(|_: &JobDetail| -> std::result::Result<Arc<dyn Job>, JobExecutionError> {
                Ok(Arc::new(Panicking))
            }),
        );
        let recorder = Arc::new(Recorder::default());
        scheduler.add_job_listener(recorder.clone(), GroupMatcher::AnyGroup);
        let key = JobKey::new("bad");
        scheduler
            .add_job(JobDetail::new(key.clone(), "panics").store_durably(), false)
            .unwrap();
        scheduler.start().unwrap();
        scheduler.trigger_job(&key).unwrap();

        wait_for(&recorder, 1).await;
        scheduler.shutdown(true).await;

        let outcomes = recorder.outcomes.lock().unwrap();
        assert!(outcomes[0].1.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn listener_group_filter_applies() {
        let scheduler = Scheduler::new(fast_settings());
        scheduler.register_job_factory(
            "counting",
            Arc::new(|_: &JobDetail| -> std::result::Result<Arc<dyn Job>, JobExecutionError> {
                Ok(Arc::new(Counting(Arc::new(AtomicUsize::new(0)))))
            }),
        );
        let all = Arc::new(Recorder::default());
        let only_other = Arc::new(Recorder::default());
        scheduler.add_job_listener(all.clone(), GroupMatcher::AnyGroup);
        scheduler.add_job_listener(only_other.clone(), GroupMatcher::group_equals("other"));

        let key = JobKey::new("count");
        scheduler
            .add_job(JobDetail::new(key.clone(), "counting").store_durably(), false)
            .unwrap();
        scheduler.start().unwrap();
        scheduler.trigger_job(&key).unwrap();

        wait_for(&all, 1).await;
        scheduler.shutdown(true).await;
        assert!(only_other.outcomes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cannot_restart_after_shutdown() {
        let scheduler = Scheduler::new(fast_settings());
        scheduler.start().unwrap();
        scheduler.shutdown(false).await;
        assert!(matches!(scheduler.start(), Err(SchedulerError::Shutdown)));
    }
}

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};
use crate::schedule::CompiledSchedule;
use crate::types::{GroupMatcher, JobDataMap, JobDetail, JobKey, MisfirePolicy, Trigger, TriggerKey};

struct TriggerEntry {
    trigger: Trigger,
    compiled: CompiledSchedule,
    next_fire: Option<DateTime<Utc>>,
}

/// A trigger that came due, with a snapshot of its job taken at fire time.
#[derive(Debug, Clone)]
pub(crate) struct FiredTrigger {
    pub job: JobDetail,
    pub trigger_key: TriggerKey,
    pub trigger_data: JobDataMap,
    pub scheduled_fire_time: DateTime<Utc>,
    pub fire_time: DateTime<Utc>,
}

/// In-memory job and trigger store. Not thread-safe on its own; the engine
/// keeps it behind a mutex.
#[derive(Default)]
pub(crate) struct JobStore {
    jobs: BTreeMap<JobKey, JobDetail>,
    triggers: BTreeMap<TriggerKey, TriggerEntry>,
}

impl JobStore {
    pub fn add_job(&mut self, detail: JobDetail, replace: bool) -> Result<()> {
        if !replace && self.jobs.contains_key(&detail.key) {
            return Err(SchedulerError::JobAlreadyExists { key: detail.key });
        }
        if !detail.durable && self.triggers_of_job(&detail.key).is_empty() {
            return Err(SchedulerError::NonDurableJob { key: detail.key });
        }
        self.jobs.insert(detail.key.clone(), detail);
        Ok(())
    }

    /// Add a job together with its first trigger. Nothing is stored on error.
    pub fn add_job_with_trigger(&mut self, detail: JobDetail, trigger: Trigger) -> Result<DateTime<Utc>> {
        if self.jobs.contains_key(&detail.key) {
            return Err(SchedulerError::JobAlreadyExists { key: detail.key });
        }
        let key = detail.key.clone();
        self.jobs.insert(key.clone(), detail);
        let mut trigger = trigger;
        trigger.job_key = key.clone();
        match self.store_trigger(trigger) {
            Ok(first) => Ok(first),
            Err(e) => {
                self.jobs.remove(&key);
                Err(e)
            }
        }
    }

    /// Remove a job and every trigger bound to it.
    pub fn delete_job(&mut self, key: &JobKey) -> bool {
        if self.jobs.remove(key).is_none() {
            return false;
        }
        self.triggers.retain(|_, entry| &entry.trigger.job_key != key);
        true
    }

    /// Validate and store a new trigger. Returns its first fire time.
    pub fn store_trigger(&mut self, trigger: Trigger) -> Result<DateTime<Utc>> {
        if self.triggers.contains_key(&trigger.key) {
            return Err(SchedulerError::TriggerAlreadyExists { key: trigger.key });
        }
        if !self.jobs.contains_key(&trigger.job_key) {
            return Err(SchedulerError::JobNotFound {
                key: trigger.job_key,
            });
        }
        let (compiled, first) = compile(&trigger)?;
        self.triggers.insert(
            trigger.key.clone(),
            TriggerEntry {
                trigger,
                compiled,
                next_fire: Some(first),
            },
        );
        Ok(first)
    }

    /// Remove a trigger. A non-durable job left without triggers goes with it.
    pub fn remove_trigger(&mut self, key: &TriggerKey) -> Option<Trigger> {
        let entry = self.triggers.remove(key)?;
        self.drop_orphaned_job(&entry.trigger.job_key);
        Some(entry.trigger)
    }

    /// Swap `old` for `new`, bound to the old trigger's job.
    ///
    /// Returns `Ok(None)` without touching the store when `old` is not found.
    /// An invalid `new` leaves `old` in place.
    pub fn replace_trigger(&mut self, old: &TriggerKey, mut new: Trigger) -> Result<Option<DateTime<Utc>>> {
        let Some(existing) = self.triggers.get(old) else {
            return Ok(None);
        };
        new.job_key = existing.trigger.job_key.clone();
        if &new.key != old && self.triggers.contains_key(&new.key) {
            return Err(SchedulerError::TriggerAlreadyExists { key: new.key });
        }
        let (compiled, first) = compile(&new)?;
        self.triggers.remove(old);
        self.triggers.insert(
            new.key.clone(),
            TriggerEntry {
                trigger: new,
                compiled,
                next_fire: Some(first),
            },
        );
        Ok(Some(first))
    }

    pub fn job(&self, key: &JobKey) -> Option<&JobDetail> {
        self.jobs.get(key)
    }

    pub fn trigger(&self, key: &TriggerKey) -> Option<&Trigger> {
        self.triggers.get(key).map(|e| &e.trigger)
    }

    pub fn job_keys(&self, matcher: &GroupMatcher) -> Vec<JobKey> {
        self.jobs
            .keys()
            .filter(|k| matcher.matches(&k.group))
            .cloned()
            .collect()
    }

    pub fn trigger_keys(&self, matcher: &GroupMatcher) -> Vec<TriggerKey> {
        self.triggers
            .keys()
            .filter(|k| matcher.matches(&k.group))
            .cloned()
            .collect()
    }

    pub fn triggers_of_job(&self, job_key: &JobKey) -> Vec<TriggerKey> {
        self.triggers
            .values()
            .filter(|e| &e.trigger.job_key == job_key)
            .map(|e| e.trigger.key.clone())
            .collect()
    }

    /// Collect every trigger due at `now` and advance it.
    ///
    /// A firing overdue by more than `misfire_threshold` is a misfire and is
    /// handled by the trigger's policy: `FireOnceNow` fires a single time and
    /// continues from `now`, `DoNothing` skips straight to the next slot after
    /// `now`. Exhausted triggers are removed.
    pub fn acquire_due(&mut self, now: DateTime<Utc>, misfire_threshold: Duration) -> Vec<FiredTrigger> {
        let due: Vec<TriggerKey> = self
            .triggers
            .iter()
            .filter(|(_, e)| e.next_fire.is_some_and(|t| t <= now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut fired = Vec::new();
        for key in due {
            let Some(entry) = self.triggers.get_mut(&key) else {
                continue;
            };
            let Some(scheduled) = entry.next_fire else {
                continue;
            };

            let misfired = now - scheduled > misfire_threshold;
            let (fire, next) = if misfired {
                match entry.trigger.misfire {
                    MisfirePolicy::FireOnceNow => (true, entry.compiled.next_after(now)),
                    MisfirePolicy::DoNothing => (false, entry.compiled.next_after(now)),
                }
            } else {
                (true, entry.compiled.next_after(scheduled))
            };
            if misfired {
                debug!(trigger = %key, %scheduled, fire, "trigger misfired");
            }
            entry.next_fire = next;

            if fire {
                match self.jobs.get(&entry.trigger.job_key) {
                    Some(job) => fired.push(FiredTrigger {
                        job: job.clone(),
                        trigger_key: key.clone(),
                        trigger_data: entry.trigger.data.clone(),
                        scheduled_fire_time: scheduled,
                        fire_time: now,
                    }),
                    None => warn!(trigger = %key, "trigger fired for a missing job"),
                }
            }

            if next.is_none() {
                debug!(trigger = %key, "trigger exhausted");
                self.remove_trigger(&key);
            }
        }

        fired.sort_by_key(|f| f.scheduled_fire_time);
        fired
    }

    fn drop_orphaned_job(&mut self, job_key: &JobKey) {
        let orphaned = self
            .jobs
            .get(job_key)
            .is_some_and(|j| !j.durable)
            && self.triggers_of_job(job_key).is_empty();
        if orphaned {
            self.jobs.remove(job_key);
            debug!(job = %job_key, "non-durable job removed with its last trigger");
        }
    }
}

fn compile(trigger: &Trigger) -> Result<(CompiledSchedule, DateTime<Utc>)> {
    let compiled = CompiledSchedule::compile(&trigger.schedule)?;
    let first = compiled.first_fire_time(trigger.start_at).ok_or_else(|| {
        SchedulerError::InvalidSchedule(format!("trigger {} will never fire", trigger.key))
    })?;
    Ok((compiled, first))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, s).unwrap()
    }

    fn durable(name: &str) -> JobDetail {
        JobDetail::new(JobKey::new(name), "test").store_durably()
    }

    fn every_minute(name: &str, job: &str, start: DateTime<Utc>) -> Trigger {
        Trigger::cron(TriggerKey::with_group(name, job), JobKey::new(job), "0 * * * * ?")
            .starting_at(start)
    }

    #[test]
    fn non_durable_job_needs_a_trigger() {
        let mut store = JobStore::default();
        let err = store
            .add_job(JobDetail::new(JobKey::new("j"), "test"), false)
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NonDurableJob { .. }));
    }

    #[test]
    fn duplicate_job_rejected_unless_replacing() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        assert!(matches!(
            store.add_job(durable("j"), false),
            Err(SchedulerError::JobAlreadyExists { .. })
        ));
        store
            .add_job(durable("j").with_description("replaced"), true)
            .unwrap();
        assert_eq!(
            store.job(&JobKey::new("j")).unwrap().description.as_deref(),
            Some("replaced")
        );
    }

    #[test]
    fn deleting_a_job_removes_its_triggers() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        store.add_job(durable("k"), false).unwrap();
        store.store_trigger(every_minute("t1", "j", at(10, 0, 0))).unwrap();
        store.store_trigger(every_minute("t2", "j", at(10, 0, 0))).unwrap();
        store.store_trigger(every_minute("t3", "k", at(10, 0, 0))).unwrap();

        assert!(store.delete_job(&JobKey::new("j")));
        assert!(!store.delete_job(&JobKey::new("j")));
        assert_eq!(store.trigger_keys(&GroupMatcher::AnyGroup).len(), 1);
    }

    #[test]
    fn trigger_for_unknown_job_is_rejected() {
        let mut store = JobStore::default();
        let err = store
            .store_trigger(every_minute("t", "ghost", at(10, 0, 0)))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::JobNotFound { .. }));
    }

    #[test]
    fn invalid_cron_stores_nothing() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        let bad = Trigger::cron(TriggerKey::new("t"), JobKey::new("j"), "every tuesday");
        assert!(matches!(
            store.store_trigger(bad),
            Err(SchedulerError::InvalidSchedule(_))
        ));
        assert!(store.trigger_keys(&GroupMatcher::AnyGroup).is_empty());
    }

    #[test]
    fn replace_missing_trigger_is_none() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        let replaced = store
            .replace_trigger(&TriggerKey::new("gone"), every_minute("t", "j", at(10, 0, 0)))
            .unwrap();
        assert!(replaced.is_none());
        assert!(store.trigger_keys(&GroupMatcher::AnyGroup).is_empty());
    }

    #[test]
    fn replace_keeps_old_trigger_when_new_is_invalid() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        let key = TriggerKey::with_group("t", "j");
        store.store_trigger(every_minute("t", "j", at(10, 0, 0))).unwrap();
        let bad = Trigger::cron(key.clone(), JobKey::new("j"), "nope");
        assert!(store.replace_trigger(&key, bad).is_err());
        assert_eq!(store.trigger(&key).unwrap().cron_expression(), Some("0 * * * * ?"));
    }

    #[test]
    fn on_time_firing_advances_from_scheduled_time() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        let key = TriggerKey::with_group("t", "j");
        store.store_trigger(every_minute("t", "j", at(10, 0, 0))).unwrap();

        assert!(store.acquire_due(at(9, 59, 59), Duration::seconds(60)).is_empty());
        let fired = store.acquire_due(at(10, 0, 1), Duration::seconds(60));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].scheduled_fire_time, at(10, 0, 0));
        assert_eq!(store.triggers[&key].next_fire, Some(at(10, 1, 0)));
    }

    #[test]
    fn misfire_fires_once_and_resumes() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        let key = TriggerKey::with_group("t", "j");
        // Started two hours in the past: 120 missed slots.
        store.store_trigger(every_minute("t", "j", at(8, 0, 0))).unwrap();

        let now = at(10, 0, 30);
        let fired = store.acquire_due(now, Duration::seconds(60));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].scheduled_fire_time, at(8, 0, 0));
        assert_eq!(fired[0].fire_time, now);
        assert_eq!(store.triggers[&key].next_fire, Some(at(10, 1, 0)));
        assert!(store.acquire_due(now, Duration::seconds(60)).is_empty());
    }

    #[test]
    fn misfire_do_nothing_skips() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        let key = TriggerKey::with_group("t", "j");
        store
            .store_trigger(
                every_minute("t", "j", at(8, 0, 0)).with_misfire(MisfirePolicy::DoNothing),
            )
            .unwrap();
        assert!(store.acquire_due(at(10, 0, 30), Duration::seconds(60)).is_empty());
        assert_eq!(store.triggers[&key].next_fire, Some(at(10, 1, 0)));
    }

    #[test]
    fn once_trigger_is_removed_with_non_durable_job() {
        let mut store = JobStore::default();
        let job = JobDetail::new(JobKey::new("j"), "test");
        let trigger = Trigger::once(TriggerKey::new("t"), JobKey::new("j"), at(10, 0, 0));
        store.add_job_with_trigger(job, trigger).unwrap();

        let fired = store.acquire_due(at(10, 0, 0), Duration::seconds(60));
        assert_eq!(fired.len(), 1);
        assert!(store.trigger(&TriggerKey::new("t")).is_none());
        assert!(store.job(&JobKey::new("j")).is_none());
    }

    #[test]
    fn unscheduling_last_trigger_keeps_durable_job() {
        let mut store = JobStore::default();
        store.add_job(durable("j"), false).unwrap();
        let key = TriggerKey::with_group("t", "j");
        store.store_trigger(every_minute("t", "j", at(10, 0, 0))).unwrap();
        assert!(store.remove_trigger(&key).is_some());
        assert!(store.remove_trigger(&key).is_none());
        assert!(store.job(&JobKey::new("j")).is_some());
    }
}

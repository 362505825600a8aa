use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, SchedulerError};
use crate::types::Schedule;

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    inner: cron::Schedule,
}

impl CronSchedule {
    /// Parse a 6 or 7 field expression. `?` is accepted as "no specific value".
    pub fn parse(expression: &str) -> Result<Self> {
        let inner = cron::Schedule::from_str(expression.trim())
            .map_err(|e| SchedulerError::InvalidSchedule(format!("{expression:?}: {e}")))?;
        Ok(Self { inner })
    }

    /// First fire time strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.after(&from).next()
    }

    /// First fire time at or after `start`.
    pub fn first_at_or_after(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // `after` works on whole seconds, so look one second back and
        // discard a candidate that lands inside the sub-second gap.
        match self.next_after(start - Duration::seconds(1)) {
            Some(t) if t >= start => Some(t),
            _ => self.next_after(start),
        }
    }
}

/// A schedule with its cron expression already parsed.
#[derive(Debug, Clone)]
pub(crate) enum CompiledSchedule {
    Once(DateTime<Utc>),
    Cron(CronSchedule),
}

impl CompiledSchedule {
    pub(crate) fn compile(schedule: &Schedule) -> Result<Self> {
        match schedule {
            Schedule::Once { at } => Ok(CompiledSchedule::Once(*at)),
            Schedule::Cron { expression } => Ok(CompiledSchedule::Cron(CronSchedule::parse(expression)?)),
        }
    }

    /// First firing of a trigger that starts at `start_at`.
    pub(crate) fn first_fire_time(&self, start_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CompiledSchedule::Once(at) => Some(*at),
            CompiledSchedule::Cron(cron) => cron.first_at_or_after(start_at),
        }
    }

    /// Next firing after `from`; `None` once the schedule is exhausted.
    pub(crate) fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CompiledSchedule::Once(_) => None,
            CompiledSchedule::Cron(cron) => cron.next_after(from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, h, m, s).unwrap()
    }

    #[test]
    fn quartz_style_expressions_parse() {
        assert!(CronSchedule::parse("0 0/5 * * * ? *").is_ok());
        assert!(CronSchedule::parse("0 30 9 ? * MON-FRI").is_ok());
        assert!(CronSchedule::parse("not a cron").is_err());
        assert!(CronSchedule::parse("").is_err());
    }

    #[test]
    fn every_five_minutes_steps_on_the_grid() {
        let cron = CronSchedule::parse("0 0/5 * * * ? *").unwrap();
        assert_eq!(cron.next_after(at(10, 2, 13)), Some(at(10, 5, 0)));
        assert_eq!(cron.next_after(at(10, 5, 0)), Some(at(10, 10, 0)));
    }

    #[test]
    fn first_fire_includes_exact_start() {
        let cron = CronSchedule::parse("0 * * * * ?").unwrap();
        assert_eq!(cron.first_at_or_after(at(10, 0, 0)), Some(at(10, 0, 0)));
        let start = at(10, 0, 0) + Duration::milliseconds(300);
        assert_eq!(cron.first_at_or_after(start), Some(at(10, 1, 0)));
    }

    #[test]
    fn once_fires_at_its_instant_and_then_never() {
        let s = CompiledSchedule::compile(&Schedule::Once { at: at(12, 0, 0) }).unwrap();
        assert_eq!(s.first_fire_time(at(11, 0, 0)), Some(at(12, 0, 0)));
        assert_eq!(s.next_after(at(12, 0, 0)), None);
    }

    #[test]
    fn out_of_range_cron_does_not_compile() {
        let s = Schedule::Cron {
            expression: "61 * * * * ?".into(),
        };
        assert!(matches!(
            CompiledSchedule::compile(&s),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }
}

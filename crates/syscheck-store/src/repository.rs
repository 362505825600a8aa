use syscheck_core::{Check, CheckResult, CheckTrigger, NewCheckResult};

use crate::error::Result;

/// Read side of the check table.
pub trait CheckRepository: Send {
    /// Enabled checks ordered by id.
    fn list_enabled(&self) -> Result<Vec<Check>>;

    /// A single check regardless of its enabled flag.
    fn get(&self, check_id: i64) -> Result<Option<Check>>;
}

/// Read side of the trigger table.
pub trait TriggerRepository: Send {
    /// Enabled triggers of one check ordered by id.
    fn list_enabled_for_check(&self, check_id: i64) -> Result<Vec<CheckTrigger>>;
}

/// Append-only result log.
pub trait ResultRepository: Send {
    /// The most recently appended result for `check_id`, if any.
    fn last_for_check(&self, check_id: i64) -> Result<Option<CheckResult>>;

    /// Append a result and return it with its assigned id.
    fn insert(&self, result: &NewCheckResult) -> Result<CheckResult>;
}

/// Hands out fresh repository instances.
///
/// Repositories must never be shared between concurrently executing jobs;
/// every execution context asks the factory for its own.
pub trait RepositoryFactory: Send + Sync {
    fn checks(&self) -> Result<Box<dyn CheckRepository>>;
    fn triggers(&self) -> Result<Box<dyn TriggerRepository>>;
    fn results(&self) -> Result<Box<dyn ResultRepository>>;
}

//! `syscheck-core` — domain records, schedule naming and configuration shared
//! by every syscheck crate.

pub mod config;
pub mod error;
pub mod keys;
pub mod types;

pub use error::{Result, SyscheckError};
pub use types::{Check, CheckResult, CheckTrigger, NewCheckResult, SuccessStatus};

//! `syscheck-checks` — the executable check kinds.
//!
//! Each kind implements [`Executable`]; the [`CheckRegistry`] maps a check's
//! `check_type` to its implementation.

pub mod email;
pub mod executable;
pub mod http;
pub mod registry;
pub mod tcp;

pub use email::EmailRoundtripCheck;
pub use executable::{CheckOutcome, Executable};
pub use registry::CheckRegistry;

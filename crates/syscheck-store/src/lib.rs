//! `syscheck-store` — SQLite-backed desired-state and result repositories.
//!
//! The scheduler side only ever sees the repository traits in [`repository`].
//! Every job execution asks a [`RepositoryFactory`] for fresh repositories so
//! no connection is shared between concurrently running jobs.

pub mod admin;
pub mod db;
pub mod error;
pub mod repository;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use repository::{CheckRepository, RepositoryFactory, ResultRepository, TriggerRepository};
pub use sqlite::{
    SqliteCheckRepository, SqliteRepositoryFactory, SqliteResultRepository,
    SqliteTriggerRepository,
};

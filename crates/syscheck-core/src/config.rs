use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Reconciler cadence: every 5 minutes, Quartz-style.
pub const DEFAULT_RECONCILE_CRON: &str = "0 0/5 * * * ? *";
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 10;
pub const DEFAULT_MISFIRE_THRESHOLD_SECS: u64 = 60;
pub const DEFAULT_TICK_MILLIS: u64 = 1000;

/// Top-level config (syscheck.toml + SYSCHECK_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyscheckConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Scheduler engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Upper bound on job executions running at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// A firing overdue by more than this is handled by the trigger's misfire policy.
    #[serde(default = "default_misfire_threshold_secs")]
    pub misfire_threshold_secs: u64,
    /// Polling cadence of the engine loop.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            misfire_threshold_secs: DEFAULT_MISFIRE_THRESHOLD_SECS,
            tick_millis: DEFAULT_TICK_MILLIS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Cron expression driving the reconciliation job itself.
    #[serde(default = "default_reconcile_cron")]
    pub cron: String,
    /// Fire one pass immediately after start instead of waiting for the first slot.
    #[serde(default = "bool_true")]
    pub run_on_start: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cron: default_reconcile_cron(),
            run_on_start: true,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}
fn default_misfire_threshold_secs() -> u64 {
    DEFAULT_MISFIRE_THRESHOLD_SECS
}
fn default_tick_millis() -> u64 {
    DEFAULT_TICK_MILLIS
}
fn default_reconcile_cron() -> String {
    DEFAULT_RECONCILE_CRON.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.syscheck/syscheck.db", home)
}

impl SyscheckConfig {
    /// Load config from a TOML file with SYSCHECK_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `SYSCHECK_SCHEDULER__MAX_CONCURRENT_JOBS=4`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::figment(&path)
            .extract()
            .map_err(|e| crate::error::SyscheckError::Config(e.to_string()))
    }

    fn figment(path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SYSCHECK_").split("__"))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.syscheck/syscheck.toml", home)
}

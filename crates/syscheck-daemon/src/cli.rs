use clap::{Args, Parser, Subcommand};

/// Runs scheduled system checks and keeps their schedule in step with the database.
#[derive(Debug, Parser)]
#[command(name = "syscheck", version)]
pub struct Cli {
    /// Config file. Falls back to $SYSCHECK_CONFIG, then ~/.syscheck/syscheck.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the scheduler and run until Ctrl-C (default).
    Run,
    /// Create the database schema and exit.
    InitDb,
    /// Insert a check row.
    AddCheck(AddCheckArgs),
    /// Attach a cron trigger to an existing check.
    AddTrigger(AddTriggerArgs),
}

#[derive(Debug, Args)]
pub struct AddCheckArgs {
    /// Label shown in logs.
    #[arg(long)]
    pub name: String,

    /// Executor key, e.g. `http` or `tcp`.
    #[arg(long = "type")]
    pub check_type: String,

    /// Executor settings as JSON.
    #[arg(long, default_value = "{}")]
    pub settings: String,
}

#[derive(Debug, Args)]
pub struct AddTriggerArgs {
    #[arg(long)]
    pub check_id: i64,

    /// Quartz-style cron expression, e.g. `0 0/5 * * * ?`.
    #[arg(long)]
    pub cron: String,

    /// Resume from the last recorded run after downtime.
    #[arg(long)]
    pub catch_up: bool,
}

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use syscheck_checks::CheckRegistry;
use syscheck_core::config::SyscheckConfig;
use syscheck_runner::SystemCheckerRunner;
use syscheck_store::{admin, db, SqliteRepositoryFactory};
use tracing::{info, warn};

mod cli;

use cli::{AddCheckArgs, AddTriggerArgs, Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "syscheck_daemon=info,syscheck_runner=info,syscheck_scheduler=info,syscheck_checks=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // explicit --config > SYSCHECK_CONFIG env > ~/.syscheck/syscheck.toml
    let config_path = cli.config.clone().or_else(|| std::env::var("SYSCHECK_CONFIG").ok());
    let config = SyscheckConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        SyscheckConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::InitDb => {
            let conn = db::open(&db_path)?;
            db::init_db(&conn)?;
            info!(path = %db_path, "database schema ready");
            Ok(())
        }
        Command::AddCheck(args) => add_check(&db_path, args),
        Command::AddTrigger(args) => add_trigger(&db_path, args),
    }
}

async fn run(config: SyscheckConfig) -> anyhow::Result<()> {
    info!(path = %config.database.path, "opening SQLite database");
    let repos = SqliteRepositoryFactory::new(config.database.path.clone());
    repos.init().context("initialising database schema")?;

    let registry = CheckRegistry::with_builtin();
    info!(check_types = ?registry.check_types(), "check executors registered");

    let runner = SystemCheckerRunner::new(&config, Arc::new(repos), registry);
    runner.start().context("starting scheduler")?;

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutdown requested, waiting for running checks");
    runner.stop().await;
    Ok(())
}

fn add_check(db_path: &str, args: AddCheckArgs) -> anyhow::Result<()> {
    let settings: serde_json::Value =
        serde_json::from_str(&args.settings).context("--settings must be valid JSON")?;
    let conn = db::open(db_path)?;
    db::init_db(&conn)?;
    let check = admin::insert_check(&conn, &args.name, &args.check_type, &settings, chrono::Utc::now())?;
    info!(check_id = check.check_id, name = %check.system_name, "check added");
    println!("{}", check.check_id);
    Ok(())
}

fn add_trigger(db_path: &str, args: AddTriggerArgs) -> anyhow::Result<()> {
    let conn = db::open(db_path)?;
    db::init_db(&conn)?;
    let trigger = admin::insert_trigger(&conn, args.check_id, &args.cron, args.catch_up, chrono::Utc::now())?;
    info!(trigger_id = trigger.trigger_id, check_id = trigger.check_id, "trigger added");
    println!("{}", trigger.trigger_id);
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

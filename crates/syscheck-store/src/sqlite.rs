use chrono::{DateTime, Utc};
use rusqlite::{types::Type, Connection, OptionalExtension};
use syscheck_core::{Check, CheckResult, CheckTrigger, NewCheckResult, SuccessStatus};
use tracing::debug;

use crate::db;
use crate::error::Result;
use crate::repository::{CheckRepository, RepositoryFactory, ResultRepository, TriggerRepository};

const CHECK_SELECT_SQL: &str =
    "SELECT check_id, system_name, check_type, settings, enabled, updated FROM check_to_perform";
const TRIGGER_SELECT_SQL: &str =
    "SELECT trigger_id, check_id, cron_expression, perform_catch_up, enabled, updated
     FROM check_trigger";
const RESULT_SELECT_SQL: &str =
    "SELECT result_id, check_id, check_dts, status, failure_detail, run_data FROM check_result";

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Map a SELECT row (column order from CHECK_SELECT_SQL) to a Check.
fn row_to_check(row: &rusqlite::Row<'_>) -> rusqlite::Result<Check> {
    let settings: String = row.get(3)?;
    let settings = serde_json::from_str(&settings)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(Check {
        check_id: row.get(0)?,
        system_name: row.get(1)?,
        check_type: row.get(2)?,
        settings,
        enabled: row.get::<_, i32>(4)? != 0,
        updated: parse_ts(5, &row.get::<_, String>(5)?)?,
    })
}

/// Map a SELECT row (column order from TRIGGER_SELECT_SQL) to a CheckTrigger.
fn row_to_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckTrigger> {
    Ok(CheckTrigger {
        trigger_id: row.get(0)?,
        check_id: row.get(1)?,
        cron_expression: row.get(2)?,
        perform_catch_up: row.get::<_, i32>(3)? != 0,
        enabled: row.get::<_, i32>(4)? != 0,
        updated: parse_ts(5, &row.get::<_, String>(5)?)?,
    })
}

/// Map a SELECT row (column order from RESULT_SELECT_SQL) to a CheckResult.
fn row_to_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckResult> {
    let code: i64 = row.get(3)?;
    let status = SuccessStatus::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Integer,
            format!("unknown status code {code}").into(),
        )
    })?;
    Ok(CheckResult {
        result_id: row.get(0)?,
        check_id: row.get(1)?,
        check_dts: parse_ts(2, &row.get::<_, String>(2)?)?,
        status,
        failure_detail: row.get(4)?,
        run_data: row.get(5)?,
    })
}

/// Check repository over its own connection.
pub struct SqliteCheckRepository {
    conn: Connection,
}

impl SqliteCheckRepository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl CheckRepository for SqliteCheckRepository {
    fn list_enabled(&self) -> Result<Vec<Check>> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("{CHECK_SELECT_SQL} WHERE enabled = 1 ORDER BY check_id"))?;
        let checks = stmt
            .query_map([], row_to_check)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(count = checks.len(), "loaded enabled checks");
        Ok(checks)
    }

    fn get(&self, check_id: i64) -> Result<Option<Check>> {
        let check = self
            .conn
            .query_row(
                &format!("{CHECK_SELECT_SQL} WHERE check_id = ?1"),
                [check_id],
                row_to_check,
            )
            .optional()?;
        Ok(check)
    }
}

/// Trigger repository over its own connection.
pub struct SqliteTriggerRepository {
    conn: Connection,
}

impl SqliteTriggerRepository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl TriggerRepository for SqliteTriggerRepository {
    fn list_enabled_for_check(&self, check_id: i64) -> Result<Vec<CheckTrigger>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "{TRIGGER_SELECT_SQL} WHERE check_id = ?1 AND enabled = 1 ORDER BY trigger_id"
        ))?;
        let triggers = stmt
            .query_map([check_id], row_to_trigger)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(triggers)
    }
}

/// Result repository over its own connection.
pub struct SqliteResultRepository {
    conn: Connection,
}

impl SqliteResultRepository {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl ResultRepository for SqliteResultRepository {
    fn last_for_check(&self, check_id: i64) -> Result<Option<CheckResult>> {
        let result = self
            .conn
            .query_row(
                &format!("{RESULT_SELECT_SQL} WHERE check_id = ?1 ORDER BY result_id DESC LIMIT 1"),
                [check_id],
                row_to_result,
            )
            .optional()?;
        Ok(result)
    }

    fn insert(&self, result: &NewCheckResult) -> Result<CheckResult> {
        self.conn.execute(
            "INSERT INTO check_result (check_id, check_dts, status, failure_detail, run_data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                result.check_id,
                result.check_dts.to_rfc3339(),
                result.status.code(),
                result.failure_detail,
                result.run_data,
            ],
        )?;
        let result_id = self.conn.last_insert_rowid();
        debug!(check_id = result.check_id, result_id, status = %result.status, "result recorded");
        Ok(CheckResult {
            result_id,
            check_id: result.check_id,
            check_dts: result.check_dts,
            status: result.status,
            failure_detail: result.failure_detail.clone(),
            run_data: result.run_data.clone(),
        })
    }
}

/// Opens a new SQLite connection for every repository it hands out.
#[derive(Debug, Clone)]
pub struct SqliteRepositoryFactory {
    path: String,
}

impl SqliteRepositoryFactory {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create the schema if it does not exist yet.
    pub fn init(&self) -> Result<()> {
        let conn = db::open(&self.path)?;
        db::init_db(&conn)
    }
}

impl RepositoryFactory for SqliteRepositoryFactory {
    fn checks(&self) -> Result<Box<dyn CheckRepository>> {
        Ok(Box::new(SqliteCheckRepository::new(db::open(&self.path)?)))
    }

    fn triggers(&self) -> Result<Box<dyn TriggerRepository>> {
        Ok(Box::new(SqliteTriggerRepository::new(db::open(&self.path)?)))
    }

    fn results(&self) -> Result<Box<dyn ResultRepository>> {
        Ok(Box::new(SqliteResultRepository::new(db::open(&self.path)?)))
    }
}

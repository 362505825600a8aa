//! Write side of the desired-state tables.
//!
//! The running system never calls these: checks and triggers are edited by
//! operators out of band. They exist for seeding and for tests. Every write
//! stamps `updated` so the reconciler notices the change on its next pass.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use syscheck_core::{Check, CheckTrigger};

use crate::error::{Result, StoreError};

pub fn insert_check(
    conn: &Connection,
    system_name: &str,
    check_type: &str,
    settings: &serde_json::Value,
    updated: DateTime<Utc>,
) -> Result<Check> {
    conn.execute(
        "INSERT INTO check_to_perform (system_name, check_type, settings, enabled, updated)
         VALUES (?1, ?2, ?3, 1, ?4)",
        rusqlite::params![
            system_name,
            check_type,
            serde_json::to_string(settings)?,
            updated.to_rfc3339()
        ],
    )?;
    Ok(Check {
        check_id: conn.last_insert_rowid(),
        system_name: system_name.to_string(),
        check_type: check_type.to_string(),
        settings: settings.clone(),
        enabled: true,
        updated,
    })
}

pub fn set_check_enabled(
    conn: &Connection,
    check_id: i64,
    enabled: bool,
    updated: DateTime<Utc>,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE check_to_perform SET enabled = ?1, updated = ?2 WHERE check_id = ?3",
        rusqlite::params![enabled as i32, updated.to_rfc3339(), check_id],
    )?;
    if n == 0 {
        return Err(StoreError::NotFound {
            entity: "check",
            id: check_id,
        });
    }
    Ok(())
}

pub fn insert_trigger(
    conn: &Connection,
    check_id: i64,
    cron_expression: &str,
    perform_catch_up: bool,
    updated: DateTime<Utc>,
) -> Result<CheckTrigger> {
    conn.execute(
        "INSERT INTO check_trigger (check_id, cron_expression, perform_catch_up, enabled, updated)
         VALUES (?1, ?2, ?3, 1, ?4)",
        rusqlite::params![
            check_id,
            cron_expression,
            perform_catch_up as i32,
            updated.to_rfc3339()
        ],
    )?;
    Ok(CheckTrigger {
        trigger_id: conn.last_insert_rowid(),
        check_id,
        cron_expression: cron_expression.to_string(),
        perform_catch_up,
        enabled: true,
        updated,
    })
}

pub fn update_trigger_cron(
    conn: &Connection,
    trigger_id: i64,
    cron_expression: &str,
    updated: DateTime<Utc>,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE check_trigger SET cron_expression = ?1, updated = ?2 WHERE trigger_id = ?3",
        rusqlite::params![cron_expression, updated.to_rfc3339(), trigger_id],
    )?;
    if n == 0 {
        return Err(StoreError::NotFound {
            entity: "trigger",
            id: trigger_id,
        });
    }
    Ok(())
}

pub fn set_trigger_enabled(
    conn: &Connection,
    trigger_id: i64,
    enabled: bool,
    updated: DateTime<Utc>,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE check_trigger SET enabled = ?1, updated = ?2 WHERE trigger_id = ?3",
        rusqlite::params![enabled as i32, updated.to_rfc3339(), trigger_id],
    )?;
    if n == 0 {
        return Err(StoreError::NotFound {
            entity: "trigger",
            id: trigger_id,
        });
    }
    Ok(())
}

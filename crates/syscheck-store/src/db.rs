use rusqlite::Connection;

use crate::error::Result;

/// Open a connection to the checks database with the pragmas every
/// connection needs.
pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// Initialise the desired-state and result schema in `conn`. Idempotent.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS check_to_perform (
            check_id     INTEGER PRIMARY KEY AUTOINCREMENT,
            system_name  TEXT    NOT NULL,
            check_type   TEXT    NOT NULL,
            settings     TEXT    NOT NULL DEFAULT 'null',  -- executor JSON
            enabled      INTEGER NOT NULL DEFAULT 1,
            updated      TEXT    NOT NULL                  -- RFC3339
        );

        CREATE TABLE IF NOT EXISTS check_trigger (
            trigger_id        INTEGER PRIMARY KEY AUTOINCREMENT,
            check_id          INTEGER NOT NULL REFERENCES check_to_perform(check_id),
            cron_expression   TEXT    NOT NULL,
            perform_catch_up  INTEGER NOT NULL DEFAULT 0,
            enabled           INTEGER NOT NULL DEFAULT 1,
            updated           TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trigger_check ON check_trigger (check_id);

        -- Append-only. The newest row per check is the one catch-up reads.
        CREATE TABLE IF NOT EXISTS check_result (
            result_id       INTEGER PRIMARY KEY AUTOINCREMENT,
            check_id        INTEGER NOT NULL REFERENCES check_to_perform(check_id),
            check_dts       TEXT    NOT NULL,
            status          INTEGER NOT NULL,
            failure_detail  TEXT,
            run_data        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_result_check ON check_result (check_id, result_id DESC);
        ",
    )?;
    Ok(())
}

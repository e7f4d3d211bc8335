//! Connection opening utilities.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections with stagehand pragmas.
//! - Emit `db_open` diagnostic events with duration and status.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Bootstrap failures close the connection by dropping it.

use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a SQLite database file configured for store usage.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let result = Connection::open(path)
        .map_err(Into::into)
        .and_then(bootstrap_connection);

    report_open("file", started_at, result)
}

/// Opens an in-memory SQLite database configured for store usage.
///
/// In-memory databases live exactly as long as their connection; use a
/// file-backed database when state must survive across units of work.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let result = Connection::open_in_memory()
        .map_err(Into::into)
        .and_then(bootstrap_connection);

    report_open("memory", started_at, result)
}

/// Executes caller-supplied schema DDL as one batch.
///
/// The core owns no schema of its own: entity definitions and their DDL
/// belong to the caller, which applies them once before data access.
pub fn apply_schema(conn: &Connection, ddl: &str) -> DbResult<()> {
    conn.execute_batch(ddl)?;
    info!("event=apply_schema module=db status=ok");
    Ok(())
}

fn bootstrap_connection(conn: Connection) -> DbResult<Connection> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

fn report_open(
    mode: &str,
    started_at: Instant,
    result: DbResult<Connection>,
) -> DbResult<Connection> {
    match result {
        Ok(conn) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_schema, open_db_in_memory};

    #[test]
    fn open_in_memory_enables_foreign_keys() {
        let conn = open_db_in_memory().unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn apply_schema_creates_tables() {
        let conn = open_db_in_memory().unwrap();
        apply_schema(&conn, "CREATE TABLE probe (id INTEGER PRIMARY KEY);").unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'probe';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}

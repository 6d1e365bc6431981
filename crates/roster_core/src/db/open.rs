//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by the repositories.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::DbResult;
use crate::config::{DatabaseConfig, DEFAULT_BUSY_TIMEOUT_MS};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file and applies all pending migrations.
///
/// Uses the default busy timeout. See [`open_with_config`] to override it.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_logged("file", DEFAULT_BUSY_TIMEOUT_MS, || {
        Connection::open(path.as_ref())
    })
}

/// Opens an in-memory SQLite database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_logged("memory", DEFAULT_BUSY_TIMEOUT_MS, Connection::open_in_memory)
}

/// Opens the database described by `config`.
///
/// A missing `path` selects an in-memory database.
pub fn open_with_config(config: &DatabaseConfig) -> DbResult<Connection> {
    match config.path.as_deref() {
        Some(path) => open_logged("file", config.busy_timeout_ms, || Connection::open(path)),
        None => open_logged("memory", config.busy_timeout_ms, Connection::open_in_memory),
    }
}

fn open_logged<F>(mode: &'static str, busy_timeout_ms: u64, connect: F) -> DbResult<Connection>
where
    F: FnOnce() -> rusqlite::Result<Connection>,
{
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = connect().map_err(|err| {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={err}",
            started_at.elapsed().as_millis()
        );
        err
    })?;

    if let Err(err) = bootstrap_connection(&mut conn, busy_timeout_ms) {
        error!(
            "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={err}",
            started_at.elapsed().as_millis()
        );
        return Err(err);
    }

    info!(
        "event=db_open module=db status=ok mode={mode} duration_ms={} busy_timeout_ms={busy_timeout_ms}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

fn bootstrap_connection(conn: &mut Connection, busy_timeout_ms: u64) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    apply_migrations(conn)?;
    Ok(())
}

use rusqlite::Connection;
use tracing::debug;

use crate::config::ConnectOptions;
use crate::error::EzDbError;

pub(crate) const MEMORY_PATH: &str = ":memory:";

pub(crate) fn is_memory_path(path: &str) -> bool {
    path == MEMORY_PATH || path.starts_with("file::memory:") || path.contains("mode=memory")
}

/// Open a `SQLite` connection described by `opts`.
///
/// `opts.database` is the file path; `None` opens a private in-memory database.
/// File databases are switched to WAL, and with autocommit off a transaction is
/// opened right away so that [`commit`](super::query::commit) has something to end.
///
/// # Errors
/// Returns `EzDbError::SqliteError` if opening or configuring the connection fails.
pub fn open_connection(opts: &ConnectOptions) -> Result<Connection, EzDbError> {
    let path = opts.database.as_deref().unwrap_or(MEMORY_PATH);
    let conn = Connection::open(path)?;
    conn.busy_timeout(opts.connect_timeout())?;

    if !is_memory_path(path) {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    if !opts.autocommit {
        conn.execute_batch("BEGIN")?;
    }
    debug!(path, "sqlite connection opened");
    Ok(conn)
}

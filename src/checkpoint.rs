//! Incremental scans: remember the last processed id in a file, then fetch the rows after it.
//!
//! ```no_run
//! use ezmysql::checkpoint::{IdLog, scan_after};
//! use ezmysql::{ConnectOptions, SqliteConnection};
//!
//! # fn main() -> Result<(), ezmysql::EzDbError> {
//! let mut conn = SqliteConnection::open(ConnectOptions::sqlite("app.db"))?;
//! let log = IdLog::new("articles.id");
//! let rows = scan_after(&mut conn, "articles", log.get_id(), 100, &["id", "title"])?;
//! if let Some(last) = rows.iter().last().and_then(|row| row.get("id")?.as_int().copied()) {
//!     log.save_id(last)?;
//! }
//! # Ok(())
//! # }
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EzDbError;
use crate::pooled::{AsyncBackend, PooledConnection};
use crate::results::ResultSet;
use crate::sync_conn::{Connection, SyncBackend};

/// Checkpoint files hold one decimal integer; anything past this is ignored.
const MAX_ID_BYTES: u64 = 32;

/// A single integer checkpoint persisted as decimal text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdLog {
    path: PathBuf,
}

impl IdLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrite the file with `id` and flush it to disk.
    ///
    /// # Errors
    /// Returns `EzDbError::Io` if the file cannot be written.
    pub fn save_id(&self, id: i64) -> Result<(), EzDbError> {
        let mut file = File::create(&self.path)?;
        file.write_all(id.to_string().as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// The stored id, or 0 when the file is missing or does not hold an integer.
    #[must_use]
    pub fn get_id(&self) -> i64 {
        match self.read_id() {
            Ok(id) => id,
            Err(err) => {
                debug!(path = %self.path.display(), %err, "no usable checkpoint, starting at 0");
                0
            }
        }
    }

    fn read_id(&self) -> Result<i64, EzDbError> {
        let mut text = String::new();
        File::open(&self.path)?
            .take(MAX_ID_BYTES)
            .read_to_string(&mut text)?;
        text.trim()
            .parse()
            .map_err(|e| EzDbError::ParameterError(format!("checkpoint is not an integer: {e}")))
    }

    /// Delete the checkpoint file; a missing file is not an error.
    ///
    /// # Errors
    /// Returns `EzDbError::Io` for any other removal failure.
    pub fn reset(&self) -> Result<(), EzDbError> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

/// `SELECT fields FROM table WHERE id > from_id ORDER BY id LIMIT limit`.
///
/// An empty `fields` selects every column.
///
/// # Errors
/// Returns `ParameterError` for invalid names, otherwise the driver error.
pub fn scan_after<B: SyncBackend>(
    conn: &mut Connection<B>,
    table: &str,
    from_id: i64,
    limit: u32,
    fields: &[&str],
) -> Result<ResultSet, EzDbError> {
    conn.scan_after(table, from_id, limit, fields)
}

/// Async counterpart of [`scan_after`].
///
/// # Errors
/// As [`scan_after`].
pub async fn scan_after_async<M: AsyncBackend>(
    pool: &PooledConnection<M>,
    table: &str,
    from_id: i64,
    limit: u32,
    fields: &[&str],
) -> Result<ResultSet, EzDbError> {
    pool.scan_after(table, from_id, limit, fields).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_and_reads_back() -> Result<(), EzDbError> {
        let dir = tempfile::tempdir()?;
        let log = IdLog::new(dir.path().join("last.id"));
        assert_eq!(log.get_id(), 0);

        log.save_id(42)?;
        assert_eq!(log.get_id(), 42);
        log.save_id(7)?;
        assert_eq!(fs::read_to_string(log.path())?, "7");
        assert_eq!(log.get_id(), 7);

        log.reset()?;
        log.reset()?;
        assert_eq!(log.get_id(), 0);
        Ok(())
    }

    #[test]
    fn tolerates_whitespace_and_garbage() -> Result<(), EzDbError> {
        let dir = tempfile::tempdir()?;
        let log = IdLog::new(dir.path().join("last.id"));
        fs::write(log.path(), " 123\n")?;
        assert_eq!(log.get_id(), 123);

        fs::write(log.path(), "abc")?;
        assert_eq!(log.get_id(), 0);

        // only the first 32 bytes are considered
        fs::write(log.path(), format!("17{}5", " ".repeat(30)))?;
        assert_eq!(log.get_id(), 17);
        Ok(())
    }
}

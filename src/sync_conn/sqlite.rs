use rusqlite::Connection as RusqliteConnection;

use super::{SyncBackend, SyncSession};
use crate::config::ConnectOptions;
use crate::error::EzDbError;
use crate::results::{ExecSummary, ResultSet};
use crate::sqlite::{self, SqliteParams};
use crate::types::{DatabaseType, Params, RowValues};

/// Opens `rusqlite` connections; `ConnectOptions::database` is the file path.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBackend;

pub struct SqliteSession {
    conn: RusqliteConnection,
    autocommit: bool,
}

impl SqliteSession {
    /// Borrow the underlying `rusqlite` connection, e.g. to create schema.
    #[must_use]
    pub fn raw(&self) -> &RusqliteConnection {
        &self.conn
    }
}

impl SyncBackend for SqliteBackend {
    type Session = SqliteSession;
    const DATABASE_TYPE: DatabaseType = DatabaseType::Sqlite;

    fn connect(&self, options: &ConnectOptions) -> Result<SqliteSession, EzDbError> {
        Ok(SqliteSession {
            conn: sqlite::open_connection(options)?,
            autocommit: options.autocommit,
        })
    }
}

impl SyncSession for SqliteSession {
    fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, EzDbError> {
        sqlite::run_query(&self.conn, sql, &SqliteParams::convert(params))
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecSummary, EzDbError> {
        sqlite::run_execute(&self.conn, sql, &SqliteParams::convert(params))
    }

    fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<RowValues>],
    ) -> Result<ExecSummary, EzDbError> {
        sqlite::run_batch(&mut self.conn, sql, rows)
    }

    fn commit(&mut self) -> Result<(), EzDbError> {
        sqlite::query::commit(&self.conn, self.autocommit)
    }
}

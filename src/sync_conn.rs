//! Idle-aware synchronous connection.
//!
//! A [`Connection`] owns one driver session. Before every statement it checks how
//! long the session sat unused; past `max_idle_time` the session is presumed dead
//! (MySQL drops idle clients after `wait_timeout`, 8 hours by default, and the client
//! only notices on the next query) and is replaced before the statement runs.

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "oracle")]
mod oracle;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::borrow::Cow;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{ConnectOptions, DuplicatePolicy};
use crate::error::EzDbError;
use crate::logging::log_statement_failure;
use crate::results::{DbRow, ExecSummary, ResultSet};
use crate::statement::{self, QueryAndParams};
use crate::translation::prepare_sql;
use crate::types::{DatabaseType, Params, Record, RowValues};

#[cfg(feature = "mysql")]
pub use mysql::{MysqlBackend, MysqlSession};
#[cfg(feature = "oracle")]
pub use oracle::{OracleBackend, OracleSession};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteBackend, SqliteSession};

/// One live driver session.
///
/// SQL handed to a session is already in the driver's native placeholder syntax.
pub trait SyncSession: Send {
    /// Run a statement and collect every row.
    ///
    /// # Errors
    /// Returns the driver error.
    fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, EzDbError>;

    /// Run a statement and keep only the first row.
    ///
    /// # Errors
    /// Returns the driver error.
    fn query_first(&mut self, sql: &str, params: &Params) -> Result<Option<DbRow>, EzDbError> {
        Ok(self.query(sql, params)?.into_first())
    }

    /// Run a data-modifying statement.
    ///
    /// # Errors
    /// Returns the driver error.
    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecSummary, EzDbError>;

    /// Run one statement once per parameter row.
    ///
    /// # Errors
    /// Returns the driver error of the first failing row.
    fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<RowValues>],
    ) -> Result<ExecSummary, EzDbError>;

    /// Commit pending work.
    ///
    /// # Errors
    /// Returns the driver error.
    fn commit(&mut self) -> Result<(), EzDbError>;
}

/// Opens sessions for one driver.
pub trait SyncBackend {
    type Session: SyncSession;

    /// Dialect of the sessions this backend opens.
    const DATABASE_TYPE: DatabaseType;

    /// Open a new session.
    ///
    /// # Errors
    /// Returns the driver's connection error.
    fn connect(&self, options: &ConnectOptions) -> Result<Self::Session, EzDbError>;
}

/// Lifecycle of the handle inside a [`Connection`].
///
/// Reconnecting happens inside [`Connection::ensure_connected`] while `&mut self` is
/// held, so it never shows up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session was ever opened.
    Uninitialized,
    /// A session is open and was used within `max_idle_time`.
    Live,
    /// A session is open but idle past `max_idle_time`; the next call replaces it.
    Stale,
    /// The session was closed explicitly, or a reconnect failed.
    Closed,
}

enum Handle<S> {
    Uninitialized,
    Live(S),
    Closed,
}

/// Idle-aware wrapper around one driver session.
///
/// Every operation takes `&mut self`; wrap the connection in a `Mutex` to share it
/// between threads.
pub struct Connection<B: SyncBackend> {
    backend: B,
    options: ConnectOptions,
    handle: Handle<B::Session>,
    last_use: Instant,
    max_idle_time: Duration,
    generation: u64,
}

impl<B: SyncBackend + Default> Connection<B> {
    /// Connect with the backend's default configuration.
    ///
    /// # Errors
    /// Returns the driver's connection error.
    pub fn open(options: ConnectOptions) -> Result<Self, EzDbError> {
        Self::connect(B::default(), options)
    }
}

impl<B: SyncBackend> Connection<B> {
    /// Create the wrapper and open the first session right away.
    ///
    /// # Errors
    /// Returns the driver's connection error.
    pub fn connect(backend: B, options: ConnectOptions) -> Result<Self, EzDbError> {
        let mut conn = Self {
            max_idle_time: options.max_idle_time(),
            backend,
            options,
            handle: Handle::Uninitialized,
            last_use: Instant::now(),
            generation: 0,
        };
        conn.reconnect()?;
        Ok(conn)
    }

    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    #[must_use]
    pub fn database_type(&self) -> DatabaseType {
        B::DATABASE_TYPE
    }

    #[must_use]
    pub fn max_idle_time(&self) -> Duration {
        self.max_idle_time
    }

    /// Change the idle threshold; takes effect on the next call.
    pub fn set_max_idle_time(&mut self, max_idle_time: Duration) {
        self.max_idle_time = max_idle_time;
    }

    #[must_use]
    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.options.on_duplicate
    }

    pub fn set_duplicate_policy(&mut self, policy: DuplicatePolicy) {
        self.options.on_duplicate = policy;
    }

    /// Number of sessions opened so far; changes whenever the handle is replaced.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Time since the handle was last used.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_use.elapsed()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        match self.handle {
            Handle::Uninitialized => ConnectionState::Uninitialized,
            Handle::Closed => ConnectionState::Closed,
            Handle::Live(_) if self.idle_for() > self.max_idle_time => ConnectionState::Stale,
            Handle::Live(_) => ConnectionState::Live,
        }
    }

    /// Return a live session, replacing the handle first when it is missing or stale.
    ///
    /// Refreshes the last-used time. A failed reconnect is returned as is; the
    /// handle stays closed and the next call tries again.
    ///
    /// # Errors
    /// Returns the driver's connection error.
    pub fn ensure_connected(&mut self) -> Result<&mut B::Session, EzDbError> {
        match self.state() {
            ConnectionState::Live => {}
            state => {
                debug!(?state, idle = ?self.idle_for(), "replacing database handle");
                self.reconnect()?;
            }
        }
        self.last_use = Instant::now();
        match &mut self.handle {
            Handle::Live(session) => Ok(session),
            Handle::Uninitialized | Handle::Closed => Err(EzDbError::ConnectionError(
                "no live database handle".into(),
            )),
        }
    }

    /// Close the current handle (if any) and open a new one.
    ///
    /// # Errors
    /// Returns the driver's connection error.
    pub fn reconnect(&mut self) -> Result<(), EzDbError> {
        // The old handle is going away regardless; a failed final commit must not block.
        if let Err(err) = self.close() {
            warn!(%err, "closing the previous handle failed");
        }
        let session = self.backend.connect(&self.options)?;
        self.handle = Handle::Live(session);
        self.generation += 1;
        self.last_use = Instant::now();
        debug!(
            generation = self.generation,
            db = ?B::DATABASE_TYPE,
            "database handle opened"
        );
        Ok(())
    }

    /// Commit when autocommit is off, then release the handle.
    ///
    /// Calling it again is a no-op. The handle is released even when the commit fails.
    ///
    /// # Errors
    /// Returns the commit error.
    pub fn close(&mut self) -> Result<(), EzDbError> {
        let previous = std::mem::replace(&mut self.handle, Handle::Closed);
        match previous {
            Handle::Live(mut session) if !self.options.autocommit => session.commit(),
            Handle::Uninitialized => {
                self.handle = Handle::Uninitialized;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Commit pending work on the current handle.
    ///
    /// # Errors
    /// Returns the driver error.
    pub fn commit(&mut self) -> Result<(), EzDbError> {
        self.ensure_connected()?.commit()
    }

    fn translate<'a>(&self, sql: &'a str, params: &Params) -> Result<Cow<'a, str>, EzDbError> {
        prepare_sql(
            B::DATABASE_TYPE,
            sql,
            params,
            self.options.translate_placeholders,
        )
    }

    /// Returns every row produced by `sql`.
    ///
    /// # Errors
    /// Returns the driver error after logging it.
    pub fn query(&mut self, sql: &str, params: impl Into<Params>) -> Result<ResultSet, EzDbError> {
        let params = params.into();
        let sql = self.translate(sql, &params)?;
        self.ensure_connected()?
            .query(&sql, &params)
            .inspect_err(|err| log_statement_failure(&sql, params.labeled(), err))
    }

    /// Returns the first row produced by `sql`, or `None` when there is none.
    ///
    /// # Errors
    /// Returns the driver error after logging it.
    pub fn get(&mut self, sql: &str, params: impl Into<Params>) -> Result<Option<DbRow>, EzDbError> {
        let params = params.into();
        let sql = self.translate(sql, &params)?;
        self.ensure_connected()?
            .query_first(&sql, &params)
            .inspect_err(|err| log_statement_failure(&sql, params.labeled(), err))
    }

    /// Run `sql` and report rows affected and the generated id.
    ///
    /// Returns `Ok(None)` when a duplicate-key error was suppressed.
    ///
    /// # Errors
    /// Returns the driver error after logging it, including duplicate keys under
    /// [`DuplicatePolicy::Raise`].
    pub fn execute_summary(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<ExecSummary>, EzDbError> {
        let params = params.into();
        let sql = self.translate(sql, &params)?;
        let result = self.ensure_connected()?.execute(&sql, &params);
        self.apply_policy(&sql, result, || params.labeled())
    }

    /// Run `sql` and return the id generated for an auto-increment column (0 when none).
    ///
    /// Returns `Ok(None)` when a duplicate-key error was suppressed.
    ///
    /// # Errors
    /// As [`execute_summary`](Self::execute_summary).
    pub fn execute(
        &mut self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<Option<u64>, EzDbError> {
        Ok(self
            .execute_summary(sql, params)?
            .map(|summary| summary.last_insert_id))
    }

    /// Alias of [`execute`](Self::execute).
    ///
    /// # Errors
    /// As [`execute_summary`](Self::execute_summary).
    pub fn insert(&mut self, sql: &str, params: impl Into<Params>) -> Result<Option<u64>, EzDbError> {
        self.execute(sql, params)
    }

    /// Run several parameterless statements on the same handle.
    ///
    /// A failing statement is logged and yields an `Err` entry; later statements still run.
    ///
    /// # Errors
    /// Returns the connect error when no handle can be opened; nothing runs then.
    pub fn query_many<I, S>(
        &mut self,
        queries: I,
    ) -> Result<Vec<Result<ResultSet, EzDbError>>, EzDbError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let no_params = Params::default();
        let translate = self.options.translate_placeholders;
        let session = self.ensure_connected()?;
        Ok(queries
            .into_iter()
            .map(|sql| {
                let sql = prepare_sql(B::DATABASE_TYPE, sql.as_ref(), &no_params, translate)?;
                session
                    .query(&sql, &no_params)
                    .inspect_err(|err| log_statement_failure(&sql, std::iter::empty(), err))
            })
            .collect())
    }

    fn apply_policy<'a, T, L>(
        &self,
        sql: &str,
        result: Result<T, EzDbError>,
        labels: impl FnOnce() -> L,
    ) -> Result<Option<T>, EzDbError>
    where
        L: IntoIterator<Item = (String, &'a RowValues)>,
    {
        self.options
            .on_duplicate
            .settle(sql, result)
            .inspect_err(|err| log_statement_failure(sql, labels(), err))
    }

    fn execute_native(
        &mut self,
        qp: &QueryAndParams,
        labels: &[String],
    ) -> Result<Option<ExecSummary>, EzDbError> {
        let params = Params::Positional(qp.params.clone());
        let result = self.ensure_connected()?.execute(&qp.query, &params);
        self.apply_policy(&qp.query, result, || {
            labels.iter().cloned().zip(qp.params.iter())
        })
    }

    /// Insert one record; keys are column names.
    ///
    /// Returns the generated id, or `None` when a duplicate key was suppressed.
    ///
    /// # Errors
    /// Returns `ParameterError` for an empty record or invalid names, otherwise the
    /// driver error after logging every field.
    pub fn table_insert(&mut self, table: &str, item: &Record) -> Result<Option<u64>, EzDbError> {
        let qp = statement::build_insert(B::DATABASE_TYPE, table, item)?;
        let labels: Vec<String> = item.keys().cloned().collect();
        Ok(self
            .execute_native(&qp, &labels)?
            .map(|summary| summary.last_insert_id))
    }

    /// Insert many records with one statement, using the first record's keys as columns.
    ///
    /// Returns rows inserted, or `None` when a duplicate key was suppressed.
    ///
    /// # Errors
    /// Returns `ParameterError` when records disagree on their keys, otherwise the
    /// driver error after logging it.
    pub fn table_insert_many(
        &mut self,
        table: &str,
        items: &[Record],
    ) -> Result<Option<u64>, EzDbError> {
        let Some(batch) = statement::build_insert_many(B::DATABASE_TYPE, table, items)? else {
            return Ok(Some(0));
        };
        let result = self.ensure_connected()?.execute_batch(&batch.query, &batch.rows);
        Ok(self
            .apply_policy(&batch.query, result, std::iter::empty)?
            .map(|summary| summary.rows_affected))
    }

    /// `UPDATE table SET ... WHERE where_field = where_value`, all values bound.
    ///
    /// Returns rows affected, or `None` when a duplicate key was suppressed.
    ///
    /// # Errors
    /// Returns `ParameterError` for an empty update or invalid names, otherwise the
    /// driver error after logging it.
    pub fn table_update(
        &mut self,
        table: &str,
        updates: &Record,
        where_field: &str,
        where_value: impl Into<RowValues>,
    ) -> Result<Option<u64>, EzDbError> {
        let qp = statement::build_update(
            B::DATABASE_TYPE,
            table,
            updates,
            where_field,
            where_value.into(),
        )?;
        let labels: Vec<String> = updates
            .keys()
            .cloned()
            .chain(std::iter::once(where_field.to_string()))
            .collect();
        Ok(self
            .execute_native(&qp, &labels)?
            .map(|summary| summary.rows_affected))
    }

    /// Look up one row with `field = value`; `None` when absent.
    ///
    /// # Errors
    /// Returns `ParameterError` for invalid names, otherwise the driver error.
    pub fn table_has(
        &mut self,
        table: &str,
        field: &str,
        value: impl Into<RowValues>,
    ) -> Result<Option<DbRow>, EzDbError> {
        let qp = statement::build_has(B::DATABASE_TYPE, table, field, value.into())?;
        let params = Params::Positional(qp.params);
        self.ensure_connected()?
            .query_first(&qp.query, &params)
            .inspect_err(|err| log_statement_failure(&qp.query, params.labeled(), err))
    }

    /// Fetch up to `limit` rows with `id > from_id`, ordered by id.
    ///
    /// # Errors
    /// Returns `ParameterError` for invalid names, otherwise the driver error.
    pub fn scan_after(
        &mut self,
        table: &str,
        from_id: i64,
        limit: u32,
        fields: &[&str],
    ) -> Result<ResultSet, EzDbError> {
        let qp = statement::build_scan(B::DATABASE_TYPE, table, from_id, limit, fields)?;
        let params = Params::Positional(qp.params);
        self.ensure_connected()?
            .query(&qp.query, &params)
            .inspect_err(|err| log_statement_failure(&qp.query, params.labeled(), err))
    }
}

impl<B: SyncBackend> Drop for Connection<B> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(%err, "commit on close failed");
        }
    }
}

impl<B: SyncBackend> std::fmt::Debug for Connection<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("db", &B::DATABASE_TYPE)
            .field("state", &self.state())
            .field("generation", &self.generation)
            .field("max_idle_time", &self.max_idle_time)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, any(feature = "mysql", feature = "sqlite")))]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::record;

    /// Session that records calls and fails on demand.
    struct FakeSession {
        fail_with_duplicate: bool,
        commits: Arc<AtomicU64>,
    }

    impl SyncSession for FakeSession {
        fn query(&mut self, _sql: &str, _params: &Params) -> Result<ResultSet, EzDbError> {
            let mut rs = ResultSet::with_capacity(1);
            rs.set_column_names(Arc::new(vec!["one".into()]));
            rs.add_row_values(vec![RowValues::Int(1)]);
            Ok(rs)
        }

        fn execute(&mut self, _sql: &str, _params: &Params) -> Result<ExecSummary, EzDbError> {
            if self.fail_with_duplicate {
                Err(duplicate_error())
            } else {
                Ok(ExecSummary {
                    rows_affected: 1,
                    last_insert_id: 9,
                })
            }
        }

        fn execute_batch(
            &mut self,
            sql: &str,
            rows: &[Vec<RowValues>],
        ) -> Result<ExecSummary, EzDbError> {
            let _ = sql;
            Ok(ExecSummary {
                rows_affected: rows.len() as u64,
                last_insert_id: 0,
            })
        }

        fn commit(&mut self) -> Result<(), EzDbError> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[cfg(feature = "mysql")]
    fn duplicate_error() -> EzDbError {
        EzDbError::MysqlError(::mysql::Error::MySqlError(::mysql::MySqlError {
            state: "23000".into(),
            message: "Duplicate entry 'a' for key 'title'".into(),
            code: crate::error::MYSQL_ER_DUP_ENTRY,
        }))
    }

    #[cfg(all(not(feature = "mysql"), feature = "sqlite"))]
    fn duplicate_error() -> EzDbError {
        EzDbError::SqliteError(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::ConstraintViolation,
                extended_code: rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE,
            },
            None,
        ))
    }

    #[derive(Default)]
    struct FakeBackend {
        connects: Arc<AtomicU64>,
        commits: Arc<AtomicU64>,
        duplicates: bool,
    }

    impl SyncBackend for FakeBackend {
        type Session = FakeSession;
        const DATABASE_TYPE: DatabaseType = DatabaseType::Mysql;

        fn connect(&self, _options: &ConnectOptions) -> Result<FakeSession, EzDbError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                fail_with_duplicate: self.duplicates,
                commits: Arc::clone(&self.commits),
            })
        }
    }

    #[test]
    fn reuses_handle_within_idle_window() -> Result<(), EzDbError> {
        let backend = FakeBackend::default();
        let connects = Arc::clone(&backend.connects);
        let mut conn = Connection::connect(backend, ConnectOptions::default())?;
        assert_eq!(conn.state(), ConnectionState::Live);

        conn.ensure_connected()?;
        conn.ensure_connected()?;
        assert_eq!(conn.generation(), 1);
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn replaces_handle_after_idle_window() -> Result<(), EzDbError> {
        let mut conn = Connection::connect(FakeBackend::default(), ConnectOptions::default())?;
        conn.set_max_idle_time(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(conn.state(), ConnectionState::Stale);

        conn.ensure_connected()?;
        assert_eq!(conn.generation(), 2);
        assert_eq!(conn.state(), ConnectionState::Live);
        Ok(())
    }

    #[test]
    fn close_is_idempotent_and_commits_without_autocommit() -> Result<(), EzDbError> {
        let backend = FakeBackend::default();
        let commits = Arc::clone(&backend.commits);
        let mut conn =
            Connection::connect(backend, ConnectOptions::default().with_autocommit(false))?;
        conn.close()?;
        conn.close()?;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(commits.load(Ordering::SeqCst), 1);

        // a closed connection reopens on demand
        conn.get("select 1", ())?;
        assert_eq!(conn.generation(), 2);
        drop(conn);
        assert_eq!(commits.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn duplicate_policy_controls_insert_outcome() -> Result<(), EzDbError> {
        let backend = FakeBackend {
            duplicates: true,
            ..FakeBackend::default()
        };
        let mut conn = Connection::connect(backend, ConnectOptions::default())?;
        let item = record! { "title" => "a" };
        assert_eq!(conn.table_insert("t", &item)?, None);

        conn.set_duplicate_policy(DuplicatePolicy::Raise);
        let err = conn.table_insert("t", &item).unwrap_err();
        assert!(err.is_duplicate_key());
        Ok(())
    }

    #[test]
    fn insert_many_of_nothing_skips_the_database() -> Result<(), EzDbError> {
        let mut conn = Connection::connect(FakeBackend::default(), ConnectOptions::default())?;
        assert_eq!(conn.table_insert_many("t", &[])?, Some(0));
        let items = vec![record! { "a" => 1 }, record! { "a" => 2 }];
        assert_eq!(conn.table_insert_many("t", &items)?, Some(2));
        Ok(())
    }

    #[test]
    fn execute_returns_generated_id() -> Result<(), EzDbError> {
        let mut conn = Connection::connect(FakeBackend::default(), ConnectOptions::default())?;
        assert_eq!(conn.execute("insert into t (a) values (%s)", [RowValues::Int(1)])?, Some(9));
        let err = conn.execute("insert into t (a) values (%s)", ()).unwrap_err();
        assert!(matches!(err, EzDbError::ParameterError(_)));
        Ok(())
    }
}

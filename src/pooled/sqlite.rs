use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bb8::ManageConnection;
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;

use super::{AsyncBackend, AsyncSession};
use crate::config::ConnectOptions;
use crate::error::EzDbError;
use crate::results::{ExecSummary, ResultSet};
use crate::sqlite::config::MEMORY_PATH;
use crate::sqlite::{self, SqliteParams};
use crate::types::{DatabaseType, Params, RowValues};

/// Shared `rusqlite` connection driven from `spawn_blocking`.
pub type SharedSqliteConnection = Arc<Mutex<rusqlite::Connection>>;

static MEMORY_DB_SEQ: AtomicU64 = AtomicU64::new(0);

/// bb8 manager for `SQLite` connections.
///
/// Every pooled connection opens the same file. Without a path (or with `:memory:`) the
/// manager names a shared-cache in-memory database, so all connections of one pool see
/// the same data.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    options: ConnectOptions,
}

impl SqliteManager {
    /// The path (or URI) every pooled connection opens.
    #[must_use]
    pub fn path(&self) -> &str {
        self.options.database.as_deref().unwrap_or_default()
    }
}

/// A pooled `SQLite` connection.
pub struct SqliteHandle {
    conn: SharedSqliteConnection,
}

impl SqliteHandle {
    /// Run `func` against the raw connection on the blocking pool.
    ///
    /// # Errors
    /// Returns the closure's error, or `ExecutionError` if the blocking task panicked.
    pub async fn with_connection<F, R>(&self, func: F) -> Result<R, EzDbError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<R, EzDbError> + Send + 'static,
        R: Send + 'static,
    {
        run_blocking(Arc::clone(&self.conn), func).await
    }

    fn check_alive(&self) -> impl Future<Output = Result<(), EzDbError>> + Send + 'static {
        run_blocking(Arc::clone(&self.conn), |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
    }
}

async fn run_blocking<F, R>(conn: SharedSqliteConnection, func: F) -> Result<R, EzDbError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, EzDbError> + Send + 'static,
    R: Send + 'static,
{
    spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| EzDbError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

impl ManageConnection for SqliteManager {
    type Connection = SqliteHandle;
    type Error = EzDbError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let options = self.options.clone();
        async move {
            let conn = spawn_blocking(move || sqlite::open_connection(&options))
                .await
                .map_err(|e| {
                    EzDbError::ConnectionError(format!("sqlite open join error: {e}"))
                })??;
            Ok(SqliteHandle {
                conn: Arc::new(Mutex::new(conn)),
            })
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        conn.check_alive()
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

impl AsyncBackend for SqliteManager {
    const DATABASE_TYPE: DatabaseType = DatabaseType::Sqlite;

    fn new(options: &ConnectOptions) -> Result<Self, EzDbError> {
        options.validate_pooled()?;
        let mut options = options.clone();
        if options.database.as_deref().is_none_or(|path| path == MEMORY_PATH) {
            let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
            options.database = Some(format!(
                "file:ezmysql-pool-{}-{seq}?mode=memory&cache=shared",
                std::process::id()
            ));
        }
        Ok(Self { options })
    }
}

#[async_trait]
impl AsyncSession for SqliteHandle {
    async fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, EzDbError> {
        let sql = sql.to_owned();
        let params = SqliteParams::convert(params);
        run_blocking(Arc::clone(&self.conn), move |conn| {
            sqlite::run_query(conn, &sql, &params)
        })
        .await
    }

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecSummary, EzDbError> {
        let sql = sql.to_owned();
        let params = SqliteParams::convert(params);
        run_blocking(Arc::clone(&self.conn), move |conn| {
            sqlite::run_execute(conn, &sql, &params)
        })
        .await
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<RowValues>],
    ) -> Result<ExecSummary, EzDbError> {
        let sql = sql.to_owned();
        let rows = rows.to_vec();
        run_blocking(Arc::clone(&self.conn), move |conn| {
            sqlite::run_batch(conn, &sql, &rows)
        })
        .await
    }

    async fn ping(&mut self) -> Result<(), EzDbError> {
        self.check_alive().await
    }
}

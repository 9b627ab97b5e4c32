//! Async pooled connection.
//!
//! [`PooledConnection`] owns a lazily built `bb8` pool. Every call checks out one
//! connection for its own duration; freshness is the pool's job (`pool_recycle` is the
//! pool's max lifetime), so there is no idle bookkeeping here. A call that fails with a
//! transient error pings its connection and runs once more.

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "sqlite")]
mod sqlite;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::ConnectOptions;
use crate::error::EzDbError;
use crate::logging::{log_statement_failure, log_transient_retry};
use crate::results::{DbRow, ExecSummary, ResultSet};
use crate::statement::{self, QueryAndParams};
use crate::translation::prepare_sql;
use crate::types::{DatabaseType, Params, Record, RowValues};

#[cfg(feature = "mysql")]
pub use mysql::MysqlManager;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteHandle, SqliteManager};

/// A pooled driver connection; SQL arrives in the driver's native placeholder syntax.
#[async_trait]
pub trait AsyncSession: Send {
    async fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, EzDbError>;

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecSummary, EzDbError>;

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<RowValues>],
    ) -> Result<ExecSummary, EzDbError>;

    /// Round-trip to the server to check (and, where the driver can, revive) the connection.
    async fn ping(&mut self) -> Result<(), EzDbError>;
}

/// A `bb8` manager whose connections speak [`AsyncSession`].
pub trait AsyncBackend: ManageConnection<Error = EzDbError, Connection: AsyncSession> {
    const DATABASE_TYPE: DatabaseType;

    /// Build the manager from connection options.
    ///
    /// # Errors
    /// Returns `ConfigError` when the options cannot describe a connection.
    fn new(options: &ConnectOptions) -> Result<Self, EzDbError>;
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub connections: u32,
    pub idle_connections: u32,
}

/// Run a session call; on a transient error ping (or replace) the connection and run it once more.
macro_rules! retry_transient {
    ($pool:expr, $conn:ident, $sql:expr, $call:expr) => {{
        match $call {
            Err(err) if err.is_transient() => {
                log_transient_retry($sql, &err);
                revive($pool, &mut $conn).await?;
                $call
            }
            other => other,
        }
    }};
}

async fn revive<'p, M: AsyncBackend>(
    pool: &'p Pool<M>,
    conn: &mut bb8::PooledConnection<'p, M>,
) -> Result<(), EzDbError> {
    if let Err(err) = conn.ping().await {
        warn!(%err, "ping failed, checking out another connection");
        *conn = pool.get().await?;
    }
    Ok(())
}

/// Async wrapper around a lazily created connection pool.
pub struct PooledConnection<M: AsyncBackend> {
    options: ConnectOptions,
    pool: OnceCell<Pool<M>>,
}

impl<M: AsyncBackend> PooledConnection<M> {
    /// Store the options; the pool is built on first use.
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            pool: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Pool occupancy, or `None` while the pool does not exist yet.
    #[must_use]
    pub fn status(&self) -> Option<PoolStatus> {
        self.pool.get().map(|pool| {
            let state = pool.state();
            PoolStatus {
                connections: state.connections,
                idle_connections: state.idle_connections,
            }
        })
    }

    /// Drop the pool. Safe to call repeatedly; the next call builds a new pool.
    pub fn close(&mut self) {
        if self.pool.take().is_some() {
            debug!(db = ?M::DATABASE_TYPE, "connection pool closed");
        }
    }

    async fn pool(&self) -> Result<&Pool<M>, EzDbError> {
        self.pool
            .get_or_try_init(|| async {
                self.options.validate_pooled()?;
                let pool_opts = &self.options.pool;
                let manager = M::new(&self.options)?;
                let pool = Pool::builder()
                    .max_size(pool_opts.max_size)
                    .min_idle(Some(pool_opts.min_size.min(pool_opts.max_size)))
                    .max_lifetime(Some(pool_opts.pool_recycle()))
                    .connection_timeout(self.options.connect_timeout())
                    .build(manager)
                    .await?;
                debug!(
                    db = ?M::DATABASE_TYPE,
                    min = pool_opts.min_size,
                    max = pool_opts.max_size,
                    "connection pool created"
                );
                Ok::<_, EzDbError>(pool)
            })
            .await
    }

    /// Returns every row produced by `sql`.
    ///
    /// # Errors
    /// Returns the driver error (after one transient retry) or a checkout timeout.
    pub async fn query(&self, sql: &str, params: impl Into<Params>) -> Result<ResultSet, EzDbError> {
        let params = params.into();
        let sql = prepare_sql(M::DATABASE_TYPE, sql, &params, self.options.translate_placeholders)?;
        let pool = self.pool().await?;
        let mut conn = pool.get().await?;
        retry_transient!(pool, conn, &sql, conn.query(&sql, &params).await)
            .inspect_err(|err| log_statement_failure(&sql, params.labeled(), err))
    }

    /// Returns the first row produced by `sql`, or `None`.
    ///
    /// # Errors
    /// As [`query`](Self::query).
    pub async fn get(&self, sql: &str, params: impl Into<Params>) -> Result<Option<DbRow>, EzDbError> {
        Ok(self.query(sql, params).await?.into_first())
    }

    /// Run `sql` and report rows affected and the generated id.
    ///
    /// # Errors
    /// As [`query`](Self::query); duplicate keys are returned, not suppressed.
    pub async fn execute_summary(
        &self,
        sql: &str,
        params: impl Into<Params>,
    ) -> Result<ExecSummary, EzDbError> {
        let params = params.into();
        let sql = prepare_sql(M::DATABASE_TYPE, sql, &params, self.options.translate_placeholders)?;
        let pool = self.pool().await?;
        let mut conn = pool.get().await?;
        retry_transient!(pool, conn, &sql, conn.execute(&sql, &params).await)
            .inspect_err(|err| log_statement_failure(&sql, params.labeled(), err))
    }

    /// Run `sql` and return the generated id (0 when none).
    ///
    /// # Errors
    /// As [`execute_summary`](Self::execute_summary).
    pub async fn execute(&self, sql: &str, params: impl Into<Params>) -> Result<u64, EzDbError> {
        Ok(self.execute_summary(sql, params).await?.last_insert_id)
    }

    /// Run parameterless statements on one checked-out connection, in order.
    ///
    /// # Errors
    /// Stops at the first statement that still fails after its transient retry.
    pub async fn query_many<I, S>(&self, queries: I) -> Result<Vec<ResultSet>, EzDbError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let no_params = Params::default();
        let pool = self.pool().await?;
        let mut conn = pool.get().await?;
        let mut results = Vec::new();
        for sql in queries {
            let sql = prepare_sql(
                M::DATABASE_TYPE,
                sql.as_ref(),
                &no_params,
                self.options.translate_placeholders,
            )?;
            let rs = retry_transient!(pool, conn, &sql, conn.query(&sql, &no_params).await)
                .inspect_err(|err| log_statement_failure(&sql, std::iter::empty(), err))?;
            results.push(rs);
        }
        Ok(results)
    }

    async fn execute_native(
        &self,
        qp: &QueryAndParams,
        labels: &[String],
    ) -> Result<Option<ExecSummary>, EzDbError> {
        let params = Params::Positional(qp.params.clone());
        let pool = self.pool().await?;
        let mut conn = pool.get().await?;
        let result = retry_transient!(pool, conn, &qp.query, conn.execute(&qp.query, &params).await);
        self.options
            .on_duplicate
            .settle(&qp.query, result)
            .inspect_err(|err| {
                log_statement_failure(&qp.query, labels.iter().cloned().zip(qp.params.iter()), err);
            })
    }

    /// Insert one record; returns the generated id, or 0 when a duplicate key was suppressed.
    ///
    /// # Errors
    /// Returns `ParameterError` for an empty record or invalid names, otherwise the
    /// driver error.
    pub async fn table_insert(&self, table: &str, item: &Record) -> Result<u64, EzDbError> {
        let qp = statement::build_insert(M::DATABASE_TYPE, table, item)?;
        let labels: Vec<String> = item.keys().cloned().collect();
        Ok(self
            .execute_native(&qp, &labels)
            .await?
            .map_or(0, |summary| summary.last_insert_id))
    }

    /// Insert many records with one statement; returns rows inserted, 0 when a duplicate
    /// key was suppressed.
    ///
    /// # Errors
    /// Returns `ParameterError` when records disagree on their keys, otherwise the
    /// driver error.
    pub async fn table_insert_many(&self, table: &str, items: &[Record]) -> Result<u64, EzDbError> {
        let Some(batch) = statement::build_insert_many(M::DATABASE_TYPE, table, items)? else {
            return Ok(0);
        };
        let pool = self.pool().await?;
        let mut conn = pool.get().await?;
        let result = retry_transient!(
            pool,
            conn,
            &batch.query,
            conn.execute_batch(&batch.query, &batch.rows).await
        );
        Ok(self
            .options
            .on_duplicate
            .settle(&batch.query, result)
            .inspect_err(|err| log_statement_failure(&batch.query, std::iter::empty(), err))?
            .map_or(0, |summary| summary.rows_affected))
    }

    /// `UPDATE table SET ... WHERE where_field = where_value`; returns rows affected.
    ///
    /// # Errors
    /// Returns `ParameterError` for an empty update or invalid names, otherwise the
    /// driver error.
    pub async fn table_update(
        &self,
        table: &str,
        updates: &Record,
        where_field: &str,
        where_value: impl Into<RowValues>,
    ) -> Result<u64, EzDbError> {
        let qp = statement::build_update(
            M::DATABASE_TYPE,
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
            .execute_native(&qp, &labels)
            .await?
            .map_or(0, |summary| summary.rows_affected))
    }

    /// Look up one row with `field = value`; `None` when absent.
    ///
    /// # Errors
    /// Returns `ParameterError` for invalid names, otherwise the driver error.
    pub async fn table_has(
        &self,
        table: &str,
        field: &str,
        value: impl Into<RowValues>,
    ) -> Result<Option<DbRow>, EzDbError> {
        let qp = statement::build_has(M::DATABASE_TYPE, table, field, value.into())?;
        Ok(self.run_native_query(qp).await?.into_first())
    }

    /// Fetch up to `limit` rows with `id > from_id`, ordered by id.
    ///
    /// # Errors
    /// Returns `ParameterError` for invalid names, otherwise the driver error.
    pub async fn scan_after(
        &self,
        table: &str,
        from_id: i64,
        limit: u32,
        fields: &[&str],
    ) -> Result<ResultSet, EzDbError> {
        let qp = statement::build_scan(M::DATABASE_TYPE, table, from_id, limit, fields)?;
        self.run_native_query(qp).await
    }

    async fn run_native_query(&self, qp: QueryAndParams) -> Result<ResultSet, EzDbError> {
        let params = Params::Positional(qp.params);
        let pool = self.pool().await?;
        let mut conn = pool.get().await?;
        retry_transient!(pool, conn, &qp.query, conn.query(&qp.query, &params).await)
            .inspect_err(|err| log_statement_failure(&qp.query, params.labeled(), err))
    }
}

impl<M: AsyncBackend> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("db", &M::DATABASE_TYPE)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

use async_trait::async_trait;
use bb8::ManageConnection;
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Row, TxOpts};
use tracing::debug;

use super::{AsyncBackend, AsyncSession};
use crate::config::ConnectOptions;
use crate::error::EzDbError;
use crate::mysql_values::nonblocking::{build_result_set, to_params, to_value};
use crate::results::{ExecSummary, ResultSet};
use crate::types::{DatabaseType, Params, RowValues};

const DEFAULT_PORT: u16 = 3306;

/// bb8 manager for `mysql_async` connections.
#[derive(Debug, Clone)]
pub struct MysqlManager {
    opts: Opts,
    connect_timeout: std::time::Duration,
}

impl MysqlManager {
    fn opts(options: &ConnectOptions) -> Opts {
        let port = if options.port == 0 {
            DEFAULT_PORT
        } else {
            options.port
        };
        OptsBuilder::default()
            .ip_or_hostname(options.host.clone())
            .tcp_port(port)
            .user(Some(options.user.clone()))
            .pass(Some(options.password.clone()))
            .db_name(options.database.clone())
            .init(vec![format!("SET NAMES {}", options.charset)])
            .into()
    }
}

impl ManageConnection for MysqlManager {
    type Connection = Conn;
    type Error = EzDbError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let opts = self.opts.clone();
        let timeout = self.connect_timeout;
        async move {
            let conn = tokio::time::timeout(timeout, Conn::new(opts))
                .await
                .map_err(|_| EzDbError::ConnectionError("mysql connect timed out".into()))??;
            debug!(id = conn.id(), "mysql pool connection opened");
            Ok(conn)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { Queryable::ping(conn).await.map_err(EzDbError::from) }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

impl AsyncBackend for MysqlManager {
    const DATABASE_TYPE: DatabaseType = DatabaseType::Mysql;

    fn new(options: &ConnectOptions) -> Result<Self, EzDbError> {
        if options.host.is_empty() {
            return Err(EzDbError::ConfigError("mysql host is empty".into()));
        }
        options.validate_pooled()?;
        Ok(Self {
            opts: Self::opts(options),
            connect_timeout: options.connect_timeout(),
        })
    }
}

#[async_trait]
impl AsyncSession for Conn {
    async fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, EzDbError> {
        let rows: Vec<Row> = if params.is_empty() {
            Queryable::query(self, sql).await?
        } else {
            self.exec(sql, to_params(params)).await?
        };
        Ok(build_result_set(rows))
    }

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecSummary, EzDbError> {
        if params.is_empty() {
            self.query_drop(sql).await?;
        } else {
            self.exec_drop(sql, to_params(params)).await?;
        }
        Ok(ExecSummary {
            rows_affected: self.affected_rows(),
            last_insert_id: self.last_insert_id().unwrap_or(0),
        })
    }

    async fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<RowValues>],
    ) -> Result<ExecSummary, EzDbError> {
        let mut tx = self.start_transaction(TxOpts::default()).await?;
        let stmt = tx.prep(sql).await?;
        let mut summary = ExecSummary::default();
        for row in rows {
            let values: Vec<mysql_async::Value> = row.iter().map(to_value).collect();
            tx.exec_drop(&stmt, values).await?;
            summary.rows_affected += tx.affected_rows();
            if summary.last_insert_id == 0 {
                summary.last_insert_id = tx.last_insert_id().unwrap_or(0);
            }
        }
        tx.commit().await?;
        Ok(summary)
    }

    async fn ping(&mut self) -> Result<(), EzDbError> {
        Queryable::ping(self).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_rejects_empty_host() {
        let opts = ConnectOptions {
            host: String::new(),
            ..ConnectOptions::default()
        };
        assert!(matches!(
            MysqlManager::new(&opts),
            Err(EzDbError::ConfigError(_))
        ));
    }

    #[test]
    fn manager_rejects_manual_commit() {
        let opts = ConnectOptions::new("db.local", "shop", "app", "pw").with_autocommit(false);
        assert!(matches!(
            MysqlManager::new(&opts),
            Err(EzDbError::ConfigError(_))
        ));
    }

    #[test]
    fn manager_fills_default_port() -> Result<(), EzDbError> {
        let manager = MysqlManager::new(&ConnectOptions::new("db.local", "shop", "app", "pw"))?;
        assert_eq!(manager.opts.tcp_port(), DEFAULT_PORT);
        assert_eq!(manager.opts.db_name(), Some("shop"));
        Ok(())
    }
}

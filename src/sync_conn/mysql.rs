use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Row, TxOpts};
use tracing::debug;

use super::{SyncBackend, SyncSession};
use crate::config::ConnectOptions;
use crate::error::EzDbError;
use crate::mysql_values::blocking::{build_result_set, to_params, to_value};
use crate::results::{ExecSummary, ResultSet};
use crate::types::{DatabaseType, Params, RowValues};

pub(crate) const DEFAULT_PORT: u16 = 3306;

/// Opens blocking `mysql` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct MysqlBackend;

pub struct MysqlSession {
    conn: Conn,
    autocommit: bool,
}

impl MysqlSession {
    /// Borrow the underlying driver connection.
    pub fn raw(&mut self) -> &mut Conn {
        &mut self.conn
    }

    fn summary(&self) -> ExecSummary {
        ExecSummary {
            rows_affected: self.conn.affected_rows(),
            last_insert_id: self.conn.last_insert_id(),
        }
    }

    fn run_rows(&mut self, sql: &str, rows: &[Vec<RowValues>]) -> Result<ExecSummary, EzDbError> {
        let stmt = self.conn.prep(sql)?;
        let mut summary = ExecSummary::default();
        for row in rows {
            self.conn.exec_drop(&stmt, row_params(row))?;
            summary.rows_affected += self.conn.affected_rows();
            if summary.last_insert_id == 0 {
                summary.last_insert_id = self.conn.last_insert_id();
            }
        }
        Ok(summary)
    }
}

fn row_params(row: &[RowValues]) -> Vec<mysql::Value> {
    row.iter().map(to_value).collect()
}

fn opts_builder(options: &ConnectOptions) -> OptsBuilder {
    let port = if options.port == 0 {
        DEFAULT_PORT
    } else {
        options.port
    };
    OptsBuilder::new()
        .ip_or_hostname(Some(options.host.clone()))
        .tcp_port(port)
        .user(Some(options.user.clone()))
        .pass(Some(options.password.clone()))
        .db_name(options.database.clone())
        .tcp_connect_timeout(Some(options.connect_timeout()))
}

impl SyncBackend for MysqlBackend {
    type Session = MysqlSession;
    const DATABASE_TYPE: DatabaseType = DatabaseType::Mysql;

    fn connect(&self, options: &ConnectOptions) -> Result<MysqlSession, EzDbError> {
        let mut conn = Conn::new(opts_builder(options))?;
        conn.query_drop(format!("SET NAMES {}", options.charset))?;
        if !options.autocommit {
            conn.query_drop("SET autocommit=0")?;
        }
        debug!(host = %options.host, db = ?options.database, "mysql connection opened");
        Ok(MysqlSession {
            conn,
            autocommit: options.autocommit,
        })
    }
}

impl SyncSession for MysqlSession {
    fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, EzDbError> {
        // The text protocol accepts statements the binary protocol rejects (SHOW, some DDL).
        let rows: Vec<Row> = if params.is_empty() {
            self.conn.query(sql)?
        } else {
            self.conn.exec(sql, to_params(params))?
        };
        Ok(build_result_set(rows))
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecSummary, EzDbError> {
        if params.is_empty() {
            self.conn.query_drop(sql)?;
        } else {
            self.conn.exec_drop(sql, to_params(params))?;
        }
        Ok(self.summary())
    }

    fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<RowValues>],
    ) -> Result<ExecSummary, EzDbError> {
        // START TRANSACTION would implicitly commit an open manual transaction,
        // so the batch is bounded by a savepoint instead.
        if !self.autocommit {
            self.conn.query_drop("SAVEPOINT ezmysql_batch")?;
            return match self.run_rows(sql, rows) {
                Ok(summary) => {
                    self.conn.query_drop("RELEASE SAVEPOINT ezmysql_batch")?;
                    Ok(summary)
                }
                Err(err) => {
                    self.conn.query_drop("ROLLBACK TO SAVEPOINT ezmysql_batch")?;
                    Err(err)
                }
            };
        }

        let mut tx = self.conn.start_transaction(TxOpts::default())?;
        let stmt = tx.prep(sql)?;
        let mut summary = ExecSummary::default();
        for row in rows {
            tx.exec_drop(&stmt, row_params(row))?;
            summary.rows_affected += tx.affected_rows();
            if summary.last_insert_id == 0 {
                summary.last_insert_id = tx.last_insert_id().unwrap_or(0);
            }
        }
        tx.commit()?;
        Ok(summary)
    }

    fn commit(&mut self) -> Result<(), EzDbError> {
        self.conn.query_drop("COMMIT")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults_port_and_passes_database() {
        let opts = ConnectOptions::new("db.local", "shop", "app", "secret");
        let opts = mysql::Opts::from(opts_builder(&opts));
        assert_eq!(opts.get_tcp_port(), DEFAULT_PORT);
        assert_eq!(opts.get_db_name(), Some("shop"));
        assert_eq!(opts.get_user(), Some("app"));
    }
}

use std::sync::Arc;

use chrono::NaiveDateTime;
use oracle::sql_type::{OracleType, ToSql};
use oracle::{Connection as OracleConnection, Row};
use tracing::debug;

use super::{SyncBackend, SyncSession};
use crate::config::ConnectOptions;
use crate::error::EzDbError;
use crate::results::{ExecSummary, ResultSet};
use crate::types::{DatabaseType, Params, RowValues};

pub(crate) const DEFAULT_PORT: u16 = 1521;

/// Opens Oracle connections through ODPI-C; `database` is the service name.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleBackend;

pub struct OracleSession {
    conn: OracleConnection,
}

impl OracleSession {
    #[must_use]
    pub fn raw(&self) -> &OracleConnection {
        &self.conn
    }
}

fn connect_string(options: &ConnectOptions) -> String {
    let port = if options.port == 0 {
        DEFAULT_PORT
    } else {
        options.port
    };
    match &options.database {
        Some(service) => format!("//{}:{port}/{service}", options.host),
        None => format!("//{}:{port}", options.host),
    }
}

fn to_sql(value: &RowValues) -> Box<dyn ToSql> {
    match value {
        RowValues::Int(i) => Box::new(*i),
        RowValues::Float(f) => Box::new(*f),
        RowValues::Text(s) => Box::new(s.clone()),
        RowValues::Bool(b) => Box::new(i64::from(*b)),
        RowValues::Timestamp(dt) => Box::new(*dt),
        RowValues::Null => Box::new(Option::<String>::None),
        RowValues::JSON(v) => Box::new(v.to_string()),
        RowValues::Blob(b) => Box::new(b.clone()),
    }
}

fn extract_value(row: &Row, idx: usize, ty: &OracleType) -> Result<RowValues, EzDbError> {
    let value = match ty {
        OracleType::Number(_, 0) | OracleType::Int64 => row
            .get::<_, Option<i64>>(idx)
            .map(RowValues::from)
            // NUMBER(38) values beyond i64 come back as text
            .or_else(|_| row.get::<_, Option<String>>(idx).map(RowValues::from))?,
        OracleType::Number(..)
        | OracleType::Float(_)
        | OracleType::BinaryFloat
        | OracleType::BinaryDouble => RowValues::from(row.get::<_, Option<f64>>(idx)?),
        OracleType::Date
        | OracleType::Timestamp(_)
        | OracleType::TimestampTZ(_)
        | OracleType::TimestampLTZ(_) => {
            RowValues::from(row.get::<_, Option<NaiveDateTime>>(idx)?)
        }
        OracleType::Raw(_) | OracleType::LongRaw | OracleType::BLOB => {
            RowValues::from(row.get::<_, Option<Vec<u8>>>(idx)?)
        }
        OracleType::Boolean => RowValues::from(row.get::<_, Option<bool>>(idx)?),
        _ => RowValues::from(row.get::<_, Option<String>>(idx)?),
    };
    Ok(value)
}

fn collect_rows(rows: oracle::ResultSet<'_, Row>) -> Result<ResultSet, EzDbError> {
    let info = rows.column_info().to_vec();
    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(
        info.iter().map(|c| c.name().to_string()).collect(),
    ));
    for row in rows {
        let row = row?;
        let values = info
            .iter()
            .enumerate()
            .map(|(idx, column)| extract_value(&row, idx, column.oracle_type()))
            .collect::<Result<Vec<_>, _>>()?;
        result_set.add_row_values(values);
    }
    Ok(result_set)
}

impl SyncBackend for OracleBackend {
    type Session = OracleSession;
    const DATABASE_TYPE: DatabaseType = DatabaseType::Oracle;

    fn connect(&self, options: &ConnectOptions) -> Result<OracleSession, EzDbError> {
        let target = connect_string(options);
        let mut conn = OracleConnection::connect(&options.user, &options.password, &target)?;
        conn.set_autocommit(options.autocommit);
        debug!(target, "oracle connection opened");
        Ok(OracleSession { conn })
    }
}

impl SyncSession for OracleSession {
    fn query(&mut self, sql: &str, params: &Params) -> Result<ResultSet, EzDbError> {
        match params {
            Params::Positional(values) => {
                let owned: Vec<Box<dyn ToSql>> = values.iter().map(to_sql).collect();
                let refs: Vec<&dyn ToSql> = owned.iter().map(|b| b.as_ref()).collect();
                collect_rows(self.conn.query(sql, &refs)?)
            }
            Params::Named(pairs) => {
                let owned: Vec<(&str, Box<dyn ToSql>)> = pairs
                    .iter()
                    .map(|(k, v)| (k.trim_start_matches(':'), to_sql(v)))
                    .collect();
                let refs: Vec<(&str, &dyn ToSql)> =
                    owned.iter().map(|(k, v)| (*k, v.as_ref())).collect();
                collect_rows(self.conn.query_named(sql, &refs)?)
            }
        }
    }

    fn execute(&mut self, sql: &str, params: &Params) -> Result<ExecSummary, EzDbError> {
        let stmt = match params {
            Params::Positional(values) => {
                let owned: Vec<Box<dyn ToSql>> = values.iter().map(to_sql).collect();
                let refs: Vec<&dyn ToSql> = owned.iter().map(|b| b.as_ref()).collect();
                self.conn.execute(sql, &refs)?
            }
            Params::Named(pairs) => {
                let owned: Vec<(&str, Box<dyn ToSql>)> = pairs
                    .iter()
                    .map(|(k, v)| (k.trim_start_matches(':'), to_sql(v)))
                    .collect();
                let refs: Vec<(&str, &dyn ToSql)> =
                    owned.iter().map(|(k, v)| (*k, v.as_ref())).collect();
                self.conn.execute_named(sql, &refs)?
            }
        };
        // Oracle has no session-wide generated id; callers use RETURNING or a sequence.
        Ok(ExecSummary {
            rows_affected: stmt.row_count()?,
            last_insert_id: 0,
        })
    }

    fn execute_batch(
        &mut self,
        sql: &str,
        rows: &[Vec<RowValues>],
    ) -> Result<ExecSummary, EzDbError> {
        let autocommit = self.conn.autocommit();
        self.conn.set_autocommit(false);
        if !autocommit {
            self.conn.execute("SAVEPOINT ezmysql_batch", &[])?;
        }
        let outcome = (|| {
            let mut stmt = self.conn.statement(sql).build()?;
            let mut total = 0;
            for row in rows {
                let owned: Vec<Box<dyn ToSql>> = row.iter().map(to_sql).collect();
                let refs: Vec<&dyn ToSql> = owned.iter().map(|b| b.as_ref()).collect();
                stmt.execute(&refs)?;
                total += stmt.row_count()?;
            }
            Ok::<_, EzDbError>(total)
        })();
        let result = match outcome {
            Ok(total) if autocommit => self.conn.commit().map(|()| total).map_err(Into::into),
            Ok(total) => Ok(total),
            Err(err) => {
                if autocommit {
                    self.conn.rollback()?;
                } else {
                    self.conn.execute("ROLLBACK TO SAVEPOINT ezmysql_batch", &[])?;
                }
                Err(err)
            }
        };
        self.conn.set_autocommit(autocommit);
        Ok(ExecSummary {
            rows_affected: result?,
            last_insert_id: 0,
        })
    }

    fn commit(&mut self) -> Result<(), EzDbError> {
        self.conn.commit()?;
        Ok(())
    }
}

use std::sync::Arc;

use rusqlite::types::Value;
use rusqlite::{Connection, Statement, ToSql};

use super::params::SqliteParams;
use crate::error::EzDbError;
use crate::results::{ExecSummary, ResultSet};
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `EzDbError` if the value cannot be read.
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<RowValues, EzDbError> {
    let value: Value = row.get(idx)?;
    match value {
        Value::Null => Ok(RowValues::Null),
        Value::Integer(i) => Ok(RowValues::Int(i)),
        Value::Real(f) => Ok(RowValues::Float(f)),
        Value::Text(s) => Ok(RowValues::Text(s)),
        Value::Blob(b) => Ok(RowValues::Blob(b)),
    }
}

fn named_refs(pairs: &[(String, Value)]) -> Vec<(&str, &dyn ToSql)> {
    pairs
        .iter()
        .map(|(k, v)| (k.as_str(), v as &dyn ToSql))
        .collect()
}

/// Build a result set from a prepared `SQLite` statement.
///
/// # Errors
/// Returns `EzDbError::SqliteError` if binding or stepping the statement fails.
pub fn build_result_set(
    stmt: &mut Statement,
    params: &SqliteParams,
) -> Result<ResultSet, EzDbError> {
    let column_names: Vec<String> = stmt
        .column_names()
        .iter()
        .map(std::string::ToString::to_string)
        .collect();
    let col_count = column_names.len();

    let mut result_set = ResultSet::with_capacity(10);
    result_set.set_column_names(Arc::new(column_names));

    let mut rows_iter = match params {
        SqliteParams::Positional(values) => stmt.query(rusqlite::params_from_iter(values.iter()))?,
        SqliteParams::Named(pairs) => stmt.query(named_refs(pairs).as_slice())?,
    };

    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(sqlite_extract_value_sync(row, i)?);
        }
        result_set.add_row_values(row_values);
    }

    Ok(result_set)
}

/// Run a row-returning statement.
///
/// # Errors
/// Returns `EzDbError::SqliteError` on prepare or execution failure.
pub fn run_query(
    conn: &Connection,
    sql: &str,
    params: &SqliteParams,
) -> Result<ResultSet, EzDbError> {
    let mut stmt = conn.prepare_cached(sql)?;
    build_result_set(&mut stmt, params)
}

fn execute_prepared(stmt: &mut Statement, params: &SqliteParams) -> Result<usize, EzDbError> {
    let affected = match params {
        SqliteParams::Positional(values) => {
            stmt.execute(rusqlite::params_from_iter(values.iter()))?
        }
        SqliteParams::Named(pairs) => stmt.execute(named_refs(pairs).as_slice())?,
    };
    Ok(affected)
}

/// `last_insert_rowid` survives across statements; report it only when this statement moved it.
fn inserted_id(conn: &Connection, before: i64) -> u64 {
    let after = conn.last_insert_rowid();
    if after == before {
        0
    } else {
        u64::try_from(after).unwrap_or(0)
    }
}

/// Execute a DML statement.
///
/// # Errors
/// Returns `EzDbError::SqliteError` on prepare or execution failure.
pub fn run_execute(
    conn: &Connection,
    sql: &str,
    params: &SqliteParams,
) -> Result<ExecSummary, EzDbError> {
    let before = conn.last_insert_rowid();
    let mut stmt = conn.prepare_cached(sql)?;
    let affected = execute_prepared(&mut stmt, params)?;
    Ok(ExecSummary {
        rows_affected: affected as u64,
        last_insert_id: inserted_id(conn, before),
    })
}

/// Execute one statement per parameter row as a unit: a transaction in autocommit mode,
/// a savepoint inside an open transaction.
///
/// # Errors
/// Returns `EzDbError::SqliteError` if any row fails; the whole batch is rolled back then,
/// and earlier work in an open transaction is kept.
pub fn run_batch(
    conn: &mut Connection,
    sql: &str,
    rows: &[Vec<RowValues>],
) -> Result<ExecSummary, EzDbError> {
    fn run_all(
        conn: &Connection,
        sql: &str,
        rows: &[Vec<RowValues>],
    ) -> Result<ExecSummary, EzDbError> {
        let before = conn.last_insert_rowid();
        let mut stmt = conn.prepare_cached(sql)?;
        let mut total = 0u64;
        for row in rows {
            total += execute_prepared(&mut stmt, &SqliteParams::positional(row))? as u64;
        }
        Ok(ExecSummary {
            rows_affected: total,
            last_insert_id: inserted_id(conn, before),
        })
    }

    if conn.is_autocommit() {
        let tx = conn.transaction()?;
        let summary = run_all(&tx, sql, rows)?;
        tx.commit()?;
        Ok(summary)
    } else {
        // dropping the savepoint on error rolls back just this batch
        let sp = conn.savepoint()?;
        let summary = run_all(&sp, sql, rows)?;
        sp.commit()?;
        Ok(summary)
    }
}

/// Commit the open transaction, then re-open one when running without autocommit.
///
/// # Errors
/// Returns `EzDbError::SqliteError` if COMMIT or BEGIN fails.
pub fn commit(conn: &Connection, autocommit: bool) -> Result<(), EzDbError> {
    if !conn.is_autocommit() {
        conn.execute_batch("COMMIT")?;
    }
    if !autocommit {
        conn.execute_batch("BEGIN")?;
    }
    Ok(())
}

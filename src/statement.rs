//! SQL builders behind the table helpers.
//!
//! Values are always bound as parameters. Table and column names cannot be bound,
//! so they are checked against a plain-identifier pattern and quoted per dialect.

use std::fmt::Write;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::EzDbError;
use crate::types::{DatabaseType, Record, RowValues};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}_][\p{L}\p{N}_$#]*$").expect("identifier pattern is valid")
});

/// A SQL string in the driver's native placeholder syntax and its bound parameters.
///
/// ```rust
/// use ezmysql::RowValues;
/// use ezmysql::statement::QueryAndParams;
///
/// let qp = QueryAndParams::new(
///     "INSERT INTO t (id, name) VALUES (?, ?)",
///     vec![RowValues::Int(1), RowValues::Text("alice".into())],
/// );
/// assert_eq!(qp.query, "INSERT INTO t (id, name) VALUES (?, ?)");
/// assert_eq!(qp.params[1].as_text(), Some("alice"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAndParams {
    pub query: String,
    pub params: Vec<RowValues>,
}

impl QueryAndParams {
    pub fn new(query: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }
}

/// One statement executed once per parameter row.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub query: String,
    pub rows: Vec<Vec<RowValues>>,
}

/// Native placeholder for the `n`th (1-based) parameter.
#[must_use]
pub fn placeholder(db_type: DatabaseType, n: usize) -> String {
    match db_type {
        DatabaseType::Mysql => "?".to_string(),
        DatabaseType::Sqlite => format!("?{n}"),
        DatabaseType::Oracle => format!(":{n}"),
    }
}

fn placeholders(db_type: DatabaseType, count: usize) -> String {
    (1..=count)
        .map(|n| placeholder(db_type, n))
        .collect::<Vec<_>>()
        .join(",")
}

/// Validate and quote a (possibly `schema.`-qualified) identifier.
///
/// # Errors
/// Returns `EzDbError::ParameterError` when any dotted part is not a plain identifier.
pub fn quote_identifier(db_type: DatabaseType, name: &str) -> Result<String, EzDbError> {
    let mut quoted = String::with_capacity(name.len() + 4);
    for (i, part) in name.split('.').enumerate() {
        if !IDENTIFIER.is_match(part) {
            return Err(EzDbError::ParameterError(format!(
                "invalid identifier {name:?}"
            )));
        }
        if i > 0 {
            quoted.push('.');
        }
        match db_type {
            DatabaseType::Mysql => {
                let _ = write!(quoted, "`{part}`");
            }
            DatabaseType::Sqlite => {
                let _ = write!(quoted, "\"{part}\"");
            }
            // quoting would make Oracle names case-sensitive
            DatabaseType::Oracle => quoted.push_str(part),
        }
    }
    Ok(quoted)
}

fn column_list<'a>(
    db_type: DatabaseType,
    names: impl IntoIterator<Item = &'a String>,
) -> Result<String, EzDbError> {
    let quoted = names
        .into_iter()
        .map(|name| quote_identifier(db_type, name))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(quoted.join(","))
}

/// `INSERT INTO table (k1,k2) VALUES (?,?)` for one record.
///
/// # Errors
/// Returns `EzDbError::ParameterError` for an empty record or invalid identifiers.
pub fn build_insert(
    db_type: DatabaseType,
    table: &str,
    item: &Record,
) -> Result<QueryAndParams, EzDbError> {
    if item.is_empty() {
        return Err(EzDbError::ParameterError(format!(
            "nothing to insert into {table}"
        )));
    }
    let query = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(db_type, table)?,
        column_list(db_type, item.keys())?,
        placeholders(db_type, item.len())
    );
    Ok(QueryAndParams::new(query, item.values().cloned().collect()))
}

/// One INSERT for many records, using the first record's keys as column order.
///
/// Returns `Ok(None)` for an empty slice.
///
/// # Errors
/// Returns `EzDbError::ParameterError` when a later record lacks one of the first
/// record's columns or has extra ones.
pub fn build_insert_many(
    db_type: DatabaseType,
    table: &str,
    items: &[Record],
) -> Result<Option<BatchStatement>, EzDbError> {
    let Some(first) = items.first() else {
        return Ok(None);
    };
    let head = build_insert(db_type, table, first)?;

    let mut rows = Vec::with_capacity(items.len());
    rows.push(head.params);
    for (n, item) in items.iter().enumerate().skip(1) {
        if item.len() != first.len() {
            return Err(EzDbError::ParameterError(format!(
                "item {n} has {} fields, expected {}",
                item.len(),
                first.len()
            )));
        }
        let row = first
            .keys()
            .map(|key| {
                item.get(key).cloned().ok_or_else(|| {
                    EzDbError::ParameterError(format!("item {n} is missing field {key}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push(row);
    }

    Ok(Some(BatchStatement {
        query: head.query,
        rows,
    }))
}

/// `UPDATE table SET a=?,b=? WHERE field=?`.
///
/// # Errors
/// Returns `EzDbError::ParameterError` for an empty update map or invalid identifiers.
pub fn build_update(
    db_type: DatabaseType,
    table: &str,
    updates: &Record,
    where_field: &str,
    where_value: RowValues,
) -> Result<QueryAndParams, EzDbError> {
    if updates.is_empty() {
        return Err(EzDbError::ParameterError(format!(
            "no fields to update in {table}"
        )));
    }
    let mut sets = Vec::with_capacity(updates.len());
    for (n, field) in updates.keys().enumerate() {
        sets.push(format!(
            "{}={}",
            quote_identifier(db_type, field)?,
            placeholder(db_type, n + 1)
        ));
    }
    let query = format!(
        "UPDATE {} SET {} WHERE {}={}",
        quote_identifier(db_type, table)?,
        sets.join(","),
        quote_identifier(db_type, where_field)?,
        placeholder(db_type, updates.len() + 1)
    );
    let mut params: Vec<RowValues> = updates.values().cloned().collect();
    params.push(where_value);
    Ok(QueryAndParams::new(query, params))
}

/// `SELECT field FROM table WHERE field=? LIMIT 1`.
///
/// # Errors
/// Returns `EzDbError::ParameterError` for invalid identifiers.
pub fn build_has(
    db_type: DatabaseType,
    table: &str,
    field: &str,
    value: RowValues,
) -> Result<QueryAndParams, EzDbError> {
    let field = quote_identifier(db_type, field)?;
    let table = quote_identifier(db_type, table)?;
    let p = placeholder(db_type, 1);
    let query = match db_type {
        DatabaseType::Oracle => {
            format!("SELECT {field} FROM {table} WHERE {field}={p} FETCH FIRST 1 ROWS ONLY")
        }
        DatabaseType::Mysql | DatabaseType::Sqlite => {
            format!("SELECT {field} FROM {table} WHERE {field}={p} LIMIT 1")
        }
    };
    Ok(QueryAndParams::new(query, vec![value]))
}

/// `SELECT fields FROM table WHERE id > ? ORDER BY id LIMIT ?`; `*` when `fields` is empty.
///
/// # Errors
/// Returns `EzDbError::ParameterError` for invalid identifiers.
pub fn build_scan(
    db_type: DatabaseType,
    table: &str,
    from_id: i64,
    limit: u32,
    fields: &[&str],
) -> Result<QueryAndParams, EzDbError> {
    let selected = if fields.is_empty() {
        "*".to_string()
    } else {
        fields
            .iter()
            .map(|f| quote_identifier(db_type, f))
            .collect::<Result<Vec<_>, _>>()?
            .join(",")
    };
    let table = quote_identifier(db_type, table)?;
    let id = quote_identifier(db_type, "id")?;
    let (p1, p2) = (placeholder(db_type, 1), placeholder(db_type, 2));
    let query = match db_type {
        DatabaseType::Oracle => format!(
            "SELECT {selected} FROM {table} WHERE {id} > {p1} ORDER BY {id} FETCH FIRST {p2} ROWS ONLY"
        ),
        DatabaseType::Mysql | DatabaseType::Sqlite => {
            format!("SELECT {selected} FROM {table} WHERE {id} > {p1} ORDER BY {id} LIMIT {p2}")
        }
    };
    Ok(QueryAndParams::new(
        query,
        vec![RowValues::Int(from_id), RowValues::Int(i64::from(limit))],
    ))
}

use rusqlite::types::Value;

use crate::types::{Params, RowValues};

/// Convert a single `RowValues` to a rusqlite `Value`.
#[must_use]
pub fn row_value_to_sqlite_value(value: &RowValues) -> Value {
    match value {
        RowValues::Int(i) => Value::Integer(*i),
        RowValues::Float(f) => Value::Real(*f),
        RowValues::Text(s) => Value::Text(s.clone()),
        RowValues::Bool(b) => Value::Integer(i64::from(*b)),
        RowValues::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(jval) => Value::Text(jval.to_string()),
        RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
    }
}

/// Parameters converted for rusqlite, positional or `:name`-keyed.
pub enum SqliteParams {
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl SqliteParams {
    #[must_use]
    pub fn convert(params: &Params) -> Self {
        match params {
            Params::Positional(values) => {
                SqliteParams::Positional(values.iter().map(row_value_to_sqlite_value).collect())
            }
            Params::Named(pairs) => SqliteParams::Named(
                pairs
                    .iter()
                    .map(|(name, v)| {
                        let name = if name.starts_with([':', '@', '$']) {
                            name.clone()
                        } else {
                            format!(":{name}")
                        };
                        (name, row_value_to_sqlite_value(v))
                    })
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn positional(values: &[RowValues]) -> Self {
        SqliteParams::Positional(values.iter().map(row_value_to_sqlite_value).collect())
    }
}

//! Value and row conversions shared by the blocking (`mysql`) and async (`mysql_async`)
//! drivers. Both build on `mysql_common`, so one macro body serves both crates.

use chrono::{NaiveDate, NaiveDateTime};

use crate::types::RowValues;

/// MySQL's `binary` collation id; string columns with it carry raw bytes.
const BINARY_CHARSET: u16 = 63;

fn date_value(y: u16, m: u8, d: u8, h: u8, mi: u8, s: u8, us: u32) -> RowValues {
    NaiveDate::from_ymd_opt(i32::from(y), u32::from(m), u32::from(d))
        .and_then(|date| {
            date.and_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
        })
        .map_or(RowValues::Null, RowValues::Timestamp)
}

fn time_value(neg: bool, days: u32, h: u8, mi: u8, s: u8, us: u32) -> RowValues {
    let hours = days * 24 + u32::from(h);
    let sign = if neg { "-" } else { "" };
    if us == 0 {
        RowValues::Text(format!("{sign}{hours:02}:{mi:02}:{s:02}"))
    } else {
        RowValues::Text(format!("{sign}{hours:02}:{mi:02}:{s:02}.{us:06}"))
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

macro_rules! mysql_conversions {
    ($driver:ident) => {
        use std::sync::Arc;

        use ::$driver::consts::ColumnType;
        use ::$driver::{Column, Row, Value};
        use chrono::{Datelike, Timelike};

        use crate::results::ResultSet;
        use crate::types::{Params, RowValues};

        /// Convert a `RowValues` into a driver value.
        #[must_use]
        pub fn to_value(value: &RowValues) -> Value {
            match value {
                RowValues::Int(i) => Value::Int(*i),
                RowValues::Float(f) => Value::Double(*f),
                RowValues::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
                RowValues::Bool(b) => Value::Int(i64::from(*b)),
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                RowValues::Timestamp(dt) => Value::Date(
                    dt.year() as u16,
                    dt.month() as u8,
                    dt.day() as u8,
                    dt.hour() as u8,
                    dt.minute() as u8,
                    dt.second() as u8,
                    dt.nanosecond() / 1_000,
                ),
                RowValues::Null => Value::NULL,
                RowValues::JSON(json) => Value::Bytes(json.to_string().into_bytes()),
                RowValues::Blob(bytes) => Value::Bytes(bytes.clone()),
            }
        }

        /// Convert `Params` into driver params.
        #[must_use]
        pub fn to_params(params: &Params) -> ::$driver::Params {
            match params {
                Params::Positional(values) if values.is_empty() => ::$driver::Params::Empty,
                Params::Positional(values) => {
                    ::$driver::Params::Positional(values.iter().map(to_value).collect())
                }
                Params::Named(pairs) => ::$driver::Params::from(
                    pairs
                        .iter()
                        .map(|(name, v)| (name.clone(), to_value(v)))
                        .collect::<Vec<(String, Value)>>(),
                ),
            }
        }

        fn bytes_value(bytes: Vec<u8>, column: &Column) -> RowValues {
            let text = || String::from_utf8_lossy(&bytes).into_owned();
            match column.column_type() {
                ColumnType::MYSQL_TYPE_TINY
                | ColumnType::MYSQL_TYPE_SHORT
                | ColumnType::MYSQL_TYPE_INT24
                | ColumnType::MYSQL_TYPE_LONG
                | ColumnType::MYSQL_TYPE_LONGLONG
                | ColumnType::MYSQL_TYPE_YEAR => {
                    text().parse().map_or_else(|_| RowValues::Text(text()), RowValues::Int)
                }
                ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
                    text().parse().map_or_else(|_| RowValues::Text(text()), RowValues::Float)
                }
                ColumnType::MYSQL_TYPE_DATE
                | ColumnType::MYSQL_TYPE_DATETIME
                | ColumnType::MYSQL_TYPE_TIMESTAMP => super::parse_datetime(&text())
                    .map_or_else(|| RowValues::Text(text()), RowValues::Timestamp),
                ColumnType::MYSQL_TYPE_JSON => serde_json::from_slice(&bytes)
                    .map_or_else(|_| RowValues::Text(text()), RowValues::JSON),
                _ if column.character_set() == super::BINARY_CHARSET => RowValues::Blob(bytes),
                _ => match String::from_utf8(bytes) {
                    Ok(s) => RowValues::Text(s),
                    Err(e) => RowValues::Blob(e.into_bytes()),
                },
            }
        }

        /// Convert a driver value read from `column`.
        #[must_use]
        pub fn from_value(value: Value, column: &Column) -> RowValues {
            match value {
                Value::NULL => RowValues::Null,
                Value::Bytes(bytes) => bytes_value(bytes, column),
                Value::Int(i) => RowValues::Int(i),
                Value::UInt(u) => {
                    i64::try_from(u).map_or_else(|_| RowValues::Text(u.to_string()), RowValues::Int)
                }
                Value::Float(f) => RowValues::Float(f64::from(f)),
                Value::Double(d) => RowValues::Float(d),
                Value::Date(y, m, d, h, mi, s, us) => super::date_value(y, m, d, h, mi, s, us),
                Value::Time(neg, days, h, mi, s, us) => super::time_value(neg, days, h, mi, s, us),
            }
        }

        /// Materialize driver rows into a `ResultSet`.
        #[must_use]
        pub fn build_result_set(rows: Vec<Row>) -> ResultSet {
            let mut result_set = ResultSet::with_capacity(rows.len());
            if let Some(first) = rows.first() {
                let names: Vec<String> = first
                    .columns_ref()
                    .iter()
                    .map(|c| c.name_str().into_owned())
                    .collect();
                result_set.set_column_names(Arc::new(names));
            }
            for row in rows {
                let columns = row.columns();
                let values = row
                    .unwrap()
                    .into_iter()
                    .zip(columns.iter())
                    .map(|(value, column)| from_value(value, column))
                    .collect();
                result_set.add_row_values(values);
            }
            result_set
        }
    };
}

pub(crate) mod blocking {
    mysql_conversions!(mysql);
}

pub(crate) mod nonblocking {
    mysql_conversions!(mysql_async);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dates_become_null() {
        assert_eq!(date_value(0, 0, 0, 0, 0, 0, 0), RowValues::Null);
        assert!(matches!(
            date_value(2024, 2, 29, 12, 0, 1, 5),
            RowValues::Timestamp(_)
        ));
    }

    #[test]
    fn times_render_as_text() {
        assert_eq!(
            time_value(true, 1, 2, 3, 4, 0),
            RowValues::Text("-26:03:04".into())
        );
        assert_eq!(
            time_value(false, 0, 0, 0, 1, 250),
            RowValues::Text("00:00:01.000250".into())
        );
    }

    #[test]
    fn parses_datetime_text() {
        assert!(parse_datetime("2024-01-02 03:04:05").is_some());
        assert!(parse_datetime("2024-01-02 03:04:05.123").is_some());
        assert!(parse_datetime("2024-01-02").is_some());
        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    fn converts_params_for_driver() {
        let params = crate::types::Params::from([RowValues::Int(1), RowValues::Bool(true)]);
        match blocking::to_params(&params) {
            ::mysql::Params::Positional(values) => {
                assert_eq!(values, vec![::mysql::Value::Int(1), ::mysql::Value::Int(1)]);
            }
            other => panic!("expected positional params, got {other:?}"),
        }
        assert!(matches!(
            nonblocking::to_params(&crate::types::Params::default()),
            ::mysql_async::Params::Empty
        ));
    }
}

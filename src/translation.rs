use std::borrow::Cow;

use crate::error::EzDbError;
use crate::types::{DatabaseType, Params};

/// Native placeholder syntax of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// Bare `?` (MySQL).
    Question,
    /// Numbered `?1`, `?2` (`SQLite`).
    NumberedQuestion,
    /// Numbered `:1`, `:2` (Oracle).
    NumberedColon,
}

impl PlaceholderStyle {
    #[must_use]
    pub fn for_database(db_type: DatabaseType) -> Self {
        match db_type {
            DatabaseType::Mysql => PlaceholderStyle::Question,
            DatabaseType::Sqlite => PlaceholderStyle::NumberedQuestion,
            DatabaseType::Oracle => PlaceholderStyle::NumberedColon,
        }
    }

    fn backslash_escapes(self) -> bool {
        matches!(self, PlaceholderStyle::Question)
    }
}

/// Result of translating a `%s`-style statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translated<'a> {
    pub sql: Cow<'a, str>,
    /// Number of `%s` placeholders found outside literals and comments.
    pub placeholders: usize,
}

/// Translate `%s` placeholders into the driver's native syntax.
///
/// `%%` becomes a literal `%`. Quoted strings, quoted identifiers and comments are
/// copied untouched, so `'%s'` stays a literal. Returns a borrowed `Cow` when no
/// changes are needed.
#[must_use]
pub fn translate_placeholders<'a>(
    sql: &'a str,
    target: PlaceholderStyle,
    enabled: bool,
) -> Translated<'a> {
    if !enabled {
        return Translated {
            sql: Cow::Borrowed(sql),
            placeholders: 0,
        };
    }

    let bytes = sql.as_bytes();
    let mut out: Option<String> = None;
    // Start of the not-yet-copied tail of `sql`.
    let mut copied = 0;
    let mut count = 0;
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => state = State::Quoted(b'\''),
                b'"' => state = State::Quoted(b'"'),
                b'`' => state = State::Quoted(b'`'),
                b'-' if bytes.get(idx + 1) == Some(&b'-') => {
                    state = State::LineComment;
                    idx += 1;
                }
                b'#' if target.backslash_escapes() => state = State::LineComment,
                b'/' if bytes.get(idx + 1) == Some(&b'*') => {
                    state = State::BlockComment;
                    idx += 1;
                }
                b'%' => match bytes.get(idx + 1) {
                    Some(b's') => {
                        count += 1;
                        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len() + 8));
                        buf.push_str(&sql[copied..idx]);
                        match target {
                            PlaceholderStyle::Question => buf.push('?'),
                            PlaceholderStyle::NumberedQuestion => {
                                buf.push('?');
                                buf.push_str(&count.to_string());
                            }
                            PlaceholderStyle::NumberedColon => {
                                buf.push(':');
                                buf.push_str(&count.to_string());
                            }
                        }
                        idx += 1;
                        copied = idx + 1;
                    }
                    Some(b'%') => {
                        let buf = out.get_or_insert_with(|| String::with_capacity(sql.len()));
                        buf.push_str(&sql[copied..=idx]);
                        idx += 1;
                        copied = idx + 1;
                    }
                    _ => {}
                },
                _ => {}
            },
            State::Quoted(quote) => {
                if b == b'\\' && quote != b'`' && target.backslash_escapes() {
                    idx += 1;
                } else if b == quote {
                    if bytes.get(idx + 1) == Some(&quote) {
                        idx += 1; // doubled quote is an escaped quote
                    } else {
                        state = State::Normal;
                    }
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    state = State::Normal;
                }
            }
            State::BlockComment => {
                if b == b'*' && bytes.get(idx + 1) == Some(&b'/') {
                    state = State::Normal;
                    idx += 1;
                }
            }
        }
        idx += 1;
    }

    let sql = match out {
        Some(mut buf) => {
            if copied < sql.len() {
                buf.push_str(&sql[copied..]);
            }
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(sql),
    };
    Translated {
        sql,
        placeholders: count,
    }
}

/// Translate `sql` for `db_type` and check the `%s` count against positional `params`.
///
/// Named parameters bypass translation: their SQL already uses the driver's `:name`
/// syntax. A statement without any `%s` is passed through so driver-native `?`
/// placeholders keep working.
///
/// # Errors
/// Returns `EzDbError::ParameterError` when the `%s` count and parameter count differ.
pub fn prepare_sql<'a>(
    db_type: DatabaseType,
    sql: &'a str,
    params: &Params,
    enabled: bool,
) -> Result<Cow<'a, str>, EzDbError> {
    if params.is_named() {
        return Ok(Cow::Borrowed(sql));
    }
    let translated =
        translate_placeholders(sql, PlaceholderStyle::for_database(db_type), enabled);
    if translated.placeholders > 0 && translated.placeholders != params.len() {
        return Err(EzDbError::ParameterError(format!(
            "statement has {} placeholders but {} parameters were given",
            translated.placeholders,
            params.len()
        )));
    }
    Ok(translated.sql)
}

#[derive(Clone, Copy)]
enum State {
    Normal,
    Quoted(u8),
    LineComment,
    BlockComment,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_for_each_driver() {
        let sql = "insert into t (a, b) values(%s, %s)";
        let mysql = translate_placeholders(sql, PlaceholderStyle::Question, true);
        assert_eq!(mysql.sql, "insert into t (a, b) values(?, ?)");
        assert_eq!(mysql.placeholders, 2);

        let sqlite = translate_placeholders(sql, PlaceholderStyle::NumberedQuestion, true);
        assert_eq!(sqlite.sql, "insert into t (a, b) values(?1, ?2)");

        let oracle = translate_placeholders(sql, PlaceholderStyle::NumberedColon, true);
        assert_eq!(oracle.sql, "insert into t (a, b) values(:1, :2)");
    }

    #[test]
    fn double_percent_is_literal() {
        let res = translate_placeholders(
            "select * from t where a like 'x%%' and b = %s and c = 5 %% 2",
            PlaceholderStyle::Question,
            true,
        );
        // inside the literal `%%` is left alone, outside it collapses
        assert_eq!(res.sql, "select * from t where a like 'x%%' and b = ? and c = 5 % 2");
        assert_eq!(res.placeholders, 1);
    }

    #[test]
    fn skips_inside_literals_and_comments() {
        let sql = "update t set title=\"%s\", x='%s' -- %s\n/* %s */ where id=%s";
        let res = translate_placeholders(sql, PlaceholderStyle::Question, true);
        assert_eq!(
            res.sql,
            "update t set title=\"%s\", x='%s' -- %s\n/* %s */ where id=?"
        );
        assert_eq!(res.placeholders, 1);
    }

    #[test]
    fn mysql_backslash_escape_does_not_end_literal() {
        let sql = r"select 'it\'s %s', %s";
        let res = translate_placeholders(sql, PlaceholderStyle::Question, true);
        assert_eq!(res.sql, r"select 'it\'s %s', ?");

        // SQLite has no backslash escapes: the literal ends at the second quote
        let res = translate_placeholders("select 'a\\', %s", PlaceholderStyle::NumberedQuestion, true);
        assert_eq!(res.sql, "select 'a\\', ?1");
    }

    #[test]
    fn keeps_multibyte_text_intact() {
        let res = translate_placeholders("select '中文' , %s -- ünïcode", PlaceholderStyle::Question, true);
        assert_eq!(res.sql, "select '中文' , ? -- ünïcode");
    }

    #[test]
    fn respects_disabled_flag() {
        let sql = "select * from t where a = %s";
        let res = translate_placeholders(sql, PlaceholderStyle::Question, false);
        assert!(matches!(res.sql, Cow::Borrowed(_)));
        assert_eq!(res.sql, sql);
    }

    #[test]
    fn prepare_checks_parameter_count() {
        let params = Params::from([crate::types::RowValues::Int(1)]);
        let sql = prepare_sql(DatabaseType::Sqlite, "select %s, %s", &params, true);
        assert!(matches!(sql, Err(EzDbError::ParameterError(_))));

        let sql = prepare_sql(DatabaseType::Sqlite, "select %s", &params, true).unwrap();
        assert_eq!(sql, "select ?1");

        // native placeholders pass through untouched
        let sql = prepare_sql(DatabaseType::Mysql, "select ?", &params, true).unwrap();
        assert_eq!(sql, "select ?");

        let named = Params::named([("id", 1)]);
        let sql = prepare_sql(DatabaseType::Oracle, "select %s from t where id = :id", &named, true)
            .unwrap();
        assert_eq!(sql, "select %s from t where id = :id");
    }

    #[test]
    fn borrows_when_nothing_to_translate() {
        let res = translate_placeholders("select 1", PlaceholderStyle::Question, true);
        assert!(matches!(res.sql, Cow::Borrowed(_)));
        assert_eq!(res.placeholders, 0);
    }
}

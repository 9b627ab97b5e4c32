use tracing::{error, warn};

use crate::error::EzDbError;
use crate::types::RowValues;

/// Values longer than this are logged as length and type only.
pub const MAX_LOGGED_VALUE_LEN: usize = 300;

/// One-line summary of a bound value for failure logs.
#[must_use]
pub fn summarize_value(value: &RowValues) -> String {
    let shown = value.to_display_string();
    let len = shown.chars().count();
    if len > MAX_LOGGED_VALUE_LEN {
        format!("<{len} chars> ({})", value.type_name())
    } else {
        format!("{shown} ({})", value.type_name())
    }
}

pub(crate) fn log_statement_failure<'a>(
    sql: &str,
    params: impl IntoIterator<Item = (String, &'a RowValues)>,
    err: &EzDbError,
) {
    error!(%err, sql, "statement failed");
    for (label, value) in params {
        error!(param = %label, value = %summarize_value(value), "bound value");
    }
}

pub(crate) fn log_duplicate_suppressed(sql: &str, err: &EzDbError) {
    warn!(%err, sql, "duplicate key suppressed");
}

pub(crate) fn log_transient_retry(sql: &str, err: &EzDbError) {
    warn!(%err, sql, "transient error, pinging connection and retrying once");
}

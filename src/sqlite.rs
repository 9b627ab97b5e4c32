//! `rusqlite` glue shared by the sync and pooled `SQLite` backends.

pub mod config;
pub mod params;
pub mod query;

pub use config::open_connection;
pub use params::{SqliteParams, row_value_to_sqlite_value};
pub use query::{build_result_set, run_batch, run_execute, run_query};

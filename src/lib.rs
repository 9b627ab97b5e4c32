//! Easy relational database access in two flavors.
//!
//! * [`Connection`]: one synchronous handle that replaces itself after sitting idle
//!   longer than `max_idle_time`, so a long-lived worker never hits "server has gone away".
//! * [`PooledConnection`]: an async wrapper around a lazily created `bb8` pool that pings
//!   and retries once when a call fails with a transient error.
//!
//! Both expose the same helpers: `query`, `get`, `execute`, `table_insert`,
//! `table_insert_many`, `table_update` and `table_has`. Statements use `%s` positional
//! placeholders, translated to each driver's own syntax.
//!
//! ```no_run
//! use ezmysql::{ConnectOptions, MysqlConnection, record};
//!
//! # fn main() -> Result<(), ezmysql::EzDbError> {
//! let mut db = MysqlConnection::open(ConnectOptions::new("localhost", "test", "root", "pw"))?;
//! let id = db.table_insert("simple", &record! { "title" => "hello", "length" => 5 })?;
//! let row = db.get("select * from simple where id=%s", [ezmysql::RowValues::from(id.unwrap_or(0))])?;
//! # let _ = row;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod logging;
#[cfg(feature = "mysql")]
mod mysql_values;
pub mod pooled;
pub mod prelude;
pub mod results;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod statement;
pub mod sync_conn;
pub mod translation;
pub mod types;

pub use checkpoint::IdLog;
pub use config::{ConnectOptions, DuplicatePolicy, PoolOptions};
pub use error::{ErrorKind, EzDbError};
pub use pooled::{AsyncBackend, AsyncSession, PoolStatus, PooledConnection};
pub use results::{DbRow, ExecSummary, ResultSet};
pub use sync_conn::{Connection, ConnectionState, SyncBackend, SyncSession};
pub use types::{DatabaseType, Params, Record, RowValues};

/// Idle-aware blocking MySQL handle.
#[cfg(feature = "mysql")]
pub type MysqlConnection = Connection<sync_conn::MysqlBackend>;
/// Pooled async MySQL handle.
#[cfg(feature = "mysql")]
pub type MysqlPool = PooledConnection<pooled::MysqlManager>;

/// Idle-aware blocking `SQLite` handle.
#[cfg(feature = "sqlite")]
pub type SqliteConnection = Connection<sync_conn::SqliteBackend>;
/// Pooled async `SQLite` handle.
#[cfg(feature = "sqlite")]
pub type SqlitePool = PooledConnection<pooled::SqliteManager>;

/// Idle-aware blocking Oracle handle.
#[cfg(feature = "oracle")]
pub type OracleConnection = Connection<sync_conn::OracleBackend>;

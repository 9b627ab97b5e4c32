//! Convenient imports for common functionality.
//!
//! ```rust
//! use ezmysql::prelude::*;
//! ```

pub use crate::checkpoint::IdLog;
pub use crate::config::{ConnectOptions, DuplicatePolicy, PoolOptions};
pub use crate::error::{ErrorKind, EzDbError};
pub use crate::pooled::PooledConnection;
pub use crate::record;
pub use crate::results::{DbRow, ExecSummary, ResultSet};
pub use crate::sync_conn::Connection;
pub use crate::types::{DatabaseType, Params, Record, RowValues};

#[cfg(feature = "mysql")]
pub use crate::{MysqlConnection, MysqlPool};
#[cfg(feature = "oracle")]
pub use crate::OracleConnection;
#[cfg(feature = "sqlite")]
pub use crate::{SqliteConnection, SqlitePool};

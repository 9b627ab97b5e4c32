use thiserror::Error;

/// MySQL server error for a duplicate entry on a unique key.
pub const MYSQL_ER_DUP_ENTRY: u16 = 1062;
/// MySQL client errors "server has gone away" and "lost connection".
#[cfg(feature = "mysql")]
const MYSQL_CR_SERVER_GONE: u16 = 2006;
#[cfg(feature = "mysql")]
const MYSQL_CR_SERVER_LOST: u16 = 2013;
/// ORA-00001: unique constraint violated.
#[cfg(feature = "oracle")]
const ORA_UNIQUE_VIOLATED: i32 = 1;
#[cfg(feature = "oracle")]
const ORA_TRANSIENT: [i32; 3] = [3113, 3114, 3135];

#[derive(Debug, Error)]
pub enum EzDbError {
    #[cfg(feature = "mysql")]
    #[error(transparent)]
    MysqlError(#[from] mysql::Error),

    #[cfg(feature = "mysql")]
    #[error(transparent)]
    MysqlAsyncError(#[from] mysql_async::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "oracle")]
    #[error(transparent)]
    OracleError(#[from] oracle::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The pool could not hand out a connection in time.
    #[error("Pool checkout timed out")]
    PoolTimeout,

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

/// Coarse classification of an [`EzDbError`].
///
/// Callers pick a policy per kind instead of matching on driver error codes:
/// duplicate keys may be suppressed, transient errors are retried once by the
/// pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A uniqueness constraint rejected the statement.
    DuplicateKey,
    /// The connection was lost or busy; retrying on a fresh or pinged handle may succeed.
    Transient,
    Other,
}

impl EzDbError {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            #[cfg(feature = "mysql")]
            EzDbError::MysqlError(err) => classify_mysql(err),
            #[cfg(feature = "mysql")]
            EzDbError::MysqlAsyncError(err) => classify_mysql_async(err),
            #[cfg(feature = "sqlite")]
            EzDbError::SqliteError(err) => classify_sqlite(err),
            #[cfg(feature = "oracle")]
            EzDbError::OracleError(err) => classify_oracle(err),
            EzDbError::PoolTimeout => ErrorKind::Transient,
            _ => ErrorKind::Other,
        }
    }

    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        self.kind() == ErrorKind::DuplicateKey
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(feature = "mysql")]
fn classify_mysql_code(code: u16) -> ErrorKind {
    match code {
        MYSQL_ER_DUP_ENTRY => ErrorKind::DuplicateKey,
        MYSQL_CR_SERVER_GONE | MYSQL_CR_SERVER_LOST => ErrorKind::Transient,
        _ => ErrorKind::Other,
    }
}

#[cfg(feature = "mysql")]
fn classify_mysql(err: &mysql::Error) -> ErrorKind {
    match err {
        mysql::Error::MySqlError(server) => classify_mysql_code(server.code),
        mysql::Error::IoError(_) | mysql::Error::DriverError(_) => ErrorKind::Transient,
        _ => ErrorKind::Other,
    }
}

#[cfg(feature = "mysql")]
fn classify_mysql_async(err: &mysql_async::Error) -> ErrorKind {
    match err {
        mysql_async::Error::Server(server) => classify_mysql_code(server.code),
        mysql_async::Error::Io(_) | mysql_async::Error::Driver(_) => ErrorKind::Transient,
        _ => ErrorKind::Other,
    }
}

#[cfg(feature = "sqlite")]
fn classify_sqlite(err: &rusqlite::Error) -> ErrorKind {
    use rusqlite::ErrorCode;

    match err {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                ErrorKind::DuplicateKey
            }
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorKind::Transient,
            _ => ErrorKind::Other,
        },
        _ => ErrorKind::Other,
    }
}

#[cfg(feature = "oracle")]
fn classify_oracle(err: &oracle::Error) -> ErrorKind {
    match err.db_error().map(oracle::DbError::code) {
        Some(ORA_UNIQUE_VIOLATED) => ErrorKind::DuplicateKey,
        Some(code) if ORA_TRANSIENT.contains(&code) => ErrorKind::Transient,
        _ => ErrorKind::Other,
    }
}

impl From<bb8::RunError<EzDbError>> for EzDbError {
    fn from(err: bb8::RunError<EzDbError>) -> Self {
        match err {
            bb8::RunError::User(inner) => inner,
            bb8::RunError::TimedOut => EzDbError::PoolTimeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "mysql")]
    #[test]
    fn mysql_codes_map_to_kinds() {
        assert_eq!(classify_mysql_code(1062), ErrorKind::DuplicateKey);
        assert_eq!(classify_mysql_code(2006), ErrorKind::Transient);
        assert_eq!(classify_mysql_code(2013), ErrorKind::Transient);
        assert_eq!(classify_mysql_code(1146), ErrorKind::Other);
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err: EzDbError = bb8::RunError::<EzDbError>::TimedOut.into();
        assert!(err.is_transient());
        let err: EzDbError =
            bb8::RunError::User(EzDbError::ConfigError("bad".into())).into();
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_unique_violation_is_duplicate() -> Result<(), rusqlite::Error> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT UNIQUE);")?;
        conn.execute("INSERT INTO t (name) VALUES ('a')", [])?;
        let err = conn
            .execute("INSERT INTO t (name) VALUES ('a')", [])
            .expect_err("second insert must violate the unique index");
        assert!(EzDbError::from(err).is_duplicate_key());

        let err = conn
            .execute("INSERT INTO t (id, name) VALUES (1, 'b')", [])
            .expect_err("primary key reuse must fail");
        assert_eq!(EzDbError::from(err).kind(), ErrorKind::DuplicateKey);
        Ok(())
    }
}

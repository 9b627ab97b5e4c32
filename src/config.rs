//! Connection options shared by the sync and pooled connections.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EzDbError;
use crate::logging::log_duplicate_suppressed;

/// What to do when a statement violates a uniqueness constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Swallow the error; the call reports "nothing inserted".
    #[default]
    Suppress,
    /// Return the error to the caller.
    Raise,
}

impl DuplicatePolicy {
    /// Resolve a statement outcome; a suppressed duplicate key becomes `Ok(None)`.
    pub(crate) fn settle<T>(
        self,
        sql: &str,
        result: Result<T, EzDbError>,
    ) -> Result<Option<T>, EzDbError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_duplicate_key() && self == DuplicatePolicy::Suppress => {
                log_duplicate_suppressed(sql, &err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Pool sizing for [`PooledConnection`](crate::pooled::PooledConnection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Idle connections the pool tries to keep open.
    ///
    /// Default: 3
    pub min_size: u32,
    /// Upper bound on live connections; checkouts wait when it is reached.
    ///
    /// Default: 5
    pub max_size: u32,
    /// Connections older than this are closed and replaced (milliseconds).
    ///
    /// Default: 25200000 (7 hours, below MySQL's 8 hour `wait_timeout`)
    pub pool_recycle_ms: u64,
}

/// Durations are kept at millisecond resolution; anything longer than `u64::MAX` ms saturates.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 3,
            max_size: 5,
            pool_recycle_ms: 7 * 3600 * 1000,
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn pool_recycle(&self) -> Duration {
        Duration::from_millis(self.pool_recycle_ms)
    }
}

/// Everything needed to open (and re-open) a database session.
///
/// For `SQLite`, `database` is the file path (or `:memory:`) and the network fields
/// are ignored.
///
/// # Examples
///
/// ```
/// use ezmysql::ConnectOptions;
///
/// let opts = ConnectOptions::new("localhost", "testdb", "root", "secret")
///     .with_port(3307)
///     .with_autocommit(false);
/// assert_eq!(opts.port, 3307);
///
/// let opts: ConnectOptions =
///     serde_json::from_str(r#"{"host": "db", "database": "app", "max_idle_time_ms": 1500}"#).unwrap();
/// assert_eq!(opts.max_idle_time().as_millis(), 1500);
/// assert_eq!(opts.charset, "utf8mb4");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub host: String,
    /// Schema / service name; `None` connects without selecting one.
    pub database: Option<String>,
    pub user: String,
    pub password: String,
    /// 0 picks the driver default (3306 for MySQL, 1521 for Oracle).
    pub port: u16,
    pub charset: String,
    pub autocommit: bool,
    /// A handle idle for longer than this is replaced before use (milliseconds).
    ///
    /// Default: 25200000 (7 hours)
    pub max_idle_time_ms: u64,
    /// Default: 10000
    pub connect_timeout_ms: u64,
    pub on_duplicate: DuplicatePolicy,
    /// Rewrite `%s` placeholders into the driver's syntax.
    ///
    /// Default: true
    pub translate_placeholders: bool,
    pub pool: PoolOptions,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            database: None,
            user: String::new(),
            password: String::new(),
            port: 0,
            charset: "utf8mb4".to_string(),
            autocommit: true,
            max_idle_time_ms: 7 * 3600 * 1000,
            connect_timeout_ms: 10_000,
            on_duplicate: DuplicatePolicy::Suppress,
            translate_placeholders: true,
            pool: PoolOptions::default(),
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(host: &str, database: &str, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            database: (!database.is_empty()).then(|| database.to_string()),
            user: user.to_string(),
            password: password.to_string(),
            ..Self::default()
        }
    }

    /// Options for a `SQLite` database file (or `:memory:`).
    #[must_use]
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            host: String::new(),
            database: Some(path.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_string();
        self
    }

    #[must_use]
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    #[must_use]
    pub fn with_max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time_ms = millis(max_idle_time);
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = millis(timeout);
        self
    }

    #[must_use]
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.on_duplicate = policy;
        self
    }

    #[must_use]
    pub fn with_translation(mut self, translate_placeholders: bool) -> Self {
        self.translate_placeholders = translate_placeholders;
        self
    }

    #[must_use]
    pub fn with_pool(mut self, min_size: u32, max_size: u32) -> Self {
        self.pool.min_size = min_size;
        self.pool.max_size = max_size;
        self
    }

    #[must_use]
    pub fn with_pool_recycle(mut self, recycle: Duration) -> Self {
        self.pool.pool_recycle_ms = millis(recycle);
        self
    }

    #[must_use]
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_millis(self.max_idle_time_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Parse options from a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `EzDbError::ConfigError` when the JSON is malformed or the options are invalid.
    pub fn from_json_str(json: &str) -> Result<Self, EzDbError> {
        let opts: Self = serde_json::from_str(json)
            .map_err(|e| EzDbError::ConfigError(format!("invalid options JSON: {e}")))?;
        opts.validate()?;
        Ok(opts)
    }

    /// Read options from a JSON file.
    ///
    /// # Errors
    /// Returns `EzDbError::Io` when the file cannot be read, or `ConfigError` as in
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EzDbError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check pool bounds.
    ///
    /// # Errors
    /// Returns `EzDbError::ConfigError` when `max_size` is 0 or below `min_size`.
    pub fn validate(&self) -> Result<(), EzDbError> {
        if self.pool.max_size == 0 {
            return Err(EzDbError::ConfigError("pool max_size must be at least 1".into()));
        }
        if self.pool.min_size > self.pool.max_size {
            return Err(EzDbError::ConfigError(format!(
                "pool min_size {} exceeds max_size {}",
                self.pool.min_size, self.pool.max_size
            )));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the rules for pooled use.
    ///
    /// # Errors
    /// Returns `EzDbError::ConfigError` as `validate` does, or when `autocommit` is off,
    /// since each pooled call runs on whichever connection it checks out.
    pub fn validate_pooled(&self) -> Result<(), EzDbError> {
        self.validate()?;
        if !self.autocommit {
            return Err(EzDbError::ConfigError(
                "pooled connections always autocommit; autocommit=false is not supported".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_mysql_habits() {
        let opts = ConnectOptions::default();
        assert_eq!(opts.max_idle_time(), Duration::from_secs(25_200));
        assert!(opts.autocommit);
        assert_eq!(opts.on_duplicate, DuplicatePolicy::Suppress);
        assert_eq!(opts.pool, PoolOptions::default());
    }

    #[test]
    fn sub_second_durations_survive_the_builders() {
        let opts = ConnectOptions::default()
            .with_max_idle_time(Duration::from_millis(500))
            .with_connect_timeout(Duration::from_millis(1500))
            .with_pool_recycle(Duration::from_millis(250));
        assert_eq!(opts.max_idle_time(), Duration::from_millis(500));
        assert_eq!(opts.connect_timeout(), Duration::from_millis(1500));
        assert_eq!(opts.pool.pool_recycle(), Duration::from_millis(250));
        assert_eq!(ConnectOptions::default().max_idle_time_ms, 25_200_000);
    }

    #[test]
    fn pooled_use_rejects_manual_commit() {
        let opts = ConnectOptions::default();
        assert!(opts.validate_pooled().is_ok());
        let err = opts.with_autocommit(false).validate_pooled().unwrap_err();
        assert!(matches!(err, EzDbError::ConfigError(_)));
    }

    #[test]
    fn empty_database_means_none() {
        let opts = ConnectOptions::new("h", "", "u", "p");
        assert_eq!(opts.database, None);
    }

    #[test]
    fn json_overrides_nested_pool() {
        let opts = ConnectOptions::from_json_str(
            r#"{"database": "x", "on_duplicate": "raise", "pool": {"max_size": 9}}"#,
        )
        .unwrap();
        assert_eq!(opts.on_duplicate, DuplicatePolicy::Raise);
        assert_eq!(opts.pool.max_size, 9);
        assert_eq!(opts.pool.min_size, 3);
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let err = ConnectOptions::from_json_str(r#"{"pool": {"min_size": 4, "max_size": 2}}"#)
            .unwrap_err();
        assert!(matches!(err, EzDbError::ConfigError(_)));
    }

    #[test]
    fn reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, r#"{"host": "db.internal", "port": 3307}"#).unwrap();
        let opts = ConnectOptions::from_json_file(&path).unwrap();
        assert_eq!(opts.host, "db.internal");
        assert_eq!(opts.port, 3307);
    }
}

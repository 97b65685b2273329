//! Error types for the database access layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver errors are classified once (see [`ErrorClass`]) so that the executor can
//! decide between fail-soft results, lock retries and propagation.

use std::borrow::Cow;

use thiserror::Error;

use crate::models::ConfigError;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported database type: '{db_type}'")]
    UnsupportedDialect { db_type: String },

    #[error("No driver available for {db_type}: {reason}")]
    DriverUnavailable { db_type: String, reason: String },

    #[error("Connection invalid: {message}")]
    ConnectionInvalid { message: String, suggestion: String },

    #[error("Connection pool exhausted: no connection available within {timeout_secs}s")]
    PoolExhausted { timeout_secs: u64 },

    #[error("Connection pool unavailable: {message}")]
    PoolUnavailable { message: String },

    #[error("Invalid SQL syntax: {message}")]
    InvalidSqlSyntax { message: String },

    #[error("Database is locked: {message}")]
    LockContention {
        message: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Query execution failed: {message}")]
    QueryExecution {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        /// Vendor specific error number (MySQL error number, SQLite extended result code)
        vendor_code: Option<i64>,
        #[source]
        source: Option<sqlx::Error>,
    },

    #[error("Unsupported operation: {operation} is not supported for {db_type}")]
    UnsupportedOperation { operation: String, db_type: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    pub fn unsupported_dialect(db_type: impl Into<String>) -> Self {
        Self::UnsupportedDialect {
            db_type: db_type.into(),
        }
    }

    pub fn driver_unavailable(db_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DriverUnavailable {
            db_type: db_type.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection_invalid(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConnectionInvalid {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_unavailable(message: impl Into<String>) -> Self {
        Self::PoolUnavailable {
            message: message.into(),
        }
    }

    pub fn invalid_sql(message: impl Into<String>) -> Self {
        Self::InvalidSqlSyntax {
            message: message.into(),
        }
    }

    /// Create a query execution error without a driver cause.
    pub fn query_execution(message: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: message.into(),
            sql_state: None,
            vendor_code: None,
            source: None,
        }
    }

    pub fn unsupported_operation(operation: impl Into<String>, db_type: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            db_type: db_type.into(),
        }
    }

    /// Create a transaction state error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::ConnectionInvalid { suggestion, .. } => Some(suggestion),
            Self::PoolExhausted { .. } => {
                Some("Release held connections or increase the pool size")
            }
            Self::InvalidSqlSyntax { .. } => Some("Check the SQL syntax"),
            Self::LockContention { .. } => Some("Retry once the other writer has finished"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionInvalid { .. } | Self::PoolExhausted { .. } | Self::LockContention { .. }
        )
    }

    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }

    /// Turn a lock-contention error into the execution error reported once retries
    /// are exhausted. Other errors pass through unchanged.
    pub fn into_exhausted(self, attempts: u32) -> Self {
        match self {
            Self::LockContention { message, source } => {
                let (sql_state, vendor_code) = source
                    .as_ref()
                    .map(driver_codes)
                    .unwrap_or((None, None));
                Self::QueryExecution {
                    message: format!(
                        "database is locked after {} attempt{}: {}",
                        attempts,
                        if attempts == 1 { "" } else { "s" },
                        message
                    ),
                    sql_state,
                    vendor_code,
                    source,
                }
            }
            other => other,
        }
    }
}

// ============================================================================
// Driver error classification
// ============================================================================

/// Coarse classification of a driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Referenced table or view does not exist.
    TableNotFound,
    Syntax,
    /// Embedded database busy or locked by another writer.
    Locked,
    Other,
}

impl ErrorClass {
    /// Classify a driver error by its SQLSTATE or vendor code. The message
    /// text is used only for SQLite and for errors that carry no code.
    pub fn of(err: &sqlx::Error) -> Self {
        let sqlx::Error::Database(db_err) = err else {
            return Self::Other;
        };

        let code = db_err.code();
        let vendor = vendor_code(&**db_err);

        if let Some(class) = Self::from_codes(code.as_deref(), vendor, is_sqlite(&**db_err)) {
            return class;
        }
        Self::from_message(db_err.message())
    }

    fn from_codes(sql_state: Option<&str>, vendor: Option<i64>, sqlite: bool) -> Option<Self> {
        if sqlite {
            // SQLite reports extended result codes; the primary code is the low byte.
            return match vendor.map(|c| c & 0xff) {
                Some(5) | Some(6) => Some(Self::Locked),
                _ => None,
            };
        }

        // A server code is authoritative; the message is only consulted without one.
        match (sql_state, vendor) {
            (None, None) => None,
            (_, Some(1146)) | (Some("42P01"), _) | (Some("42S02"), _) => Some(Self::TableNotFound),
            (_, Some(1064)) | (Some("42601"), _) => Some(Self::Syntax),
            _ => Some(Self::Other),
        }
    }

    /// Classify from the driver message alone.
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();

        const TABLE_NOT_FOUND: &[&str] = &[
            "no such table",
            "does not exist",
            "doesn't exist",
            "invalid object name",
            "ora-00942",
        ];
        const SYNTAX: &[&str] = &["syntax error", "incomplete input", "error in your sql syntax"];
        const LOCKED: &[&str] = &["database is locked", "database table is locked", "busy"];

        if TABLE_NOT_FOUND.iter().any(|p| lower.contains(p)) {
            Self::TableNotFound
        } else if SYNTAX.iter().any(|p| lower.contains(p)) {
            Self::Syntax
        } else if LOCKED.iter().any(|p| lower.contains(p)) {
            Self::Locked
        } else {
            Self::Other
        }
    }
}

fn is_sqlite(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    db_err.try_downcast_ref::<sqlx::sqlite::SqliteError>().is_some()
}

/// Vendor error number, when the driver exposes one.
fn vendor_code(db_err: &dyn sqlx::error::DatabaseError) -> Option<i64> {
    if let Some(mysql) = db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
        return Some(i64::from(mysql.number()));
    }
    if is_sqlite(db_err) {
        return db_err.code().and_then(|c: Cow<'_, str>| c.parse::<i64>().ok());
    }
    None
}

/// (SQLSTATE, vendor code) for a driver error.
fn driver_codes(err: &sqlx::Error) -> (Option<String>, Option<i64>) {
    match err {
        sqlx::Error::Database(db_err) => {
            let vendor = vendor_code(&**db_err);
            let sql_state = if is_sqlite(&**db_err) {
                None
            } else {
                db_err.code().map(|c| c.to_string())
            };
            (sql_state, vendor)
        }
        _ => (None, None),
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Configuration(msg) => DbError::connection_invalid(
                msg.to_string(),
                "Check the connection parameters and credentials",
            ),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted { timeout_secs: 0 },
            sqlx::Error::PoolClosed => DbError::pool_unavailable("Connection pool is closed"),
            sqlx::Error::Io(io_err) => DbError::connection_invalid(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection_invalid(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Database(db_err) => match ErrorClass::of(&err) {
                ErrorClass::Syntax => DbError::invalid_sql(db_err.message()),
                ErrorClass::Locked => DbError::LockContention {
                    message: db_err.message().to_string(),
                    source: Some(err),
                },
                ErrorClass::TableNotFound | ErrorClass::Other => {
                    let message = db_err.message().to_string();
                    let (sql_state, vendor_code) = driver_codes(&err);
                    DbError::QueryExecution {
                        message,
                        sql_state,
                        vendor_code,
                        source: Some(err),
                    }
                }
            },
            _ => DbError::QueryExecution {
                message: err.to_string(),
                sql_state: None,
                vendor_code: None,
                source: Some(err),
            },
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection_invalid("validation query failed", "Check the server");
        assert!(err.to_string().contains("Connection invalid"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::connection_invalid("refused", "Check credentials");
        assert_eq!(err.suggestion(), Some("Check credentials"));
        assert!(DbError::invalid_input("x").suggestion().is_none());
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::PoolExhausted { timeout_secs: 30 }.is_retryable());
        assert!(
            DbError::LockContention {
                message: "database is locked".into(),
                source: None
            }
            .is_retryable()
        );
        assert!(!DbError::invalid_sql("bad").is_retryable());
    }

    #[test]
    fn test_config_error_converts() {
        let err: DbError = ConfigError::EmptyHost.into();
        assert!(err.to_string().contains("Server address cannot be empty"));
    }

    #[test]
    fn test_classify_from_message() {
        assert_eq!(
            ErrorClass::from_message("no such table: missing"),
            ErrorClass::TableNotFound
        );
        assert_eq!(
            ErrorClass::from_message("relation \"x\" does not exist"),
            ErrorClass::TableNotFound
        );
        assert_eq!(
            ErrorClass::from_message("Table 'db.x' doesn't exist"),
            ErrorClass::TableNotFound
        );
        assert_eq!(
            ErrorClass::from_message("near \"WHERE\": syntax error"),
            ErrorClass::Syntax
        );
        assert_eq!(ErrorClass::from_message("incomplete input"), ErrorClass::Syntax);
        assert_eq!(
            ErrorClass::from_message("database is locked"),
            ErrorClass::Locked
        );
        assert_eq!(
            ErrorClass::from_message("UNIQUE constraint failed: t.id"),
            ErrorClass::Other
        );
    }

    #[test]
    fn test_classify_from_codes() {
        assert_eq!(
            ErrorClass::from_codes(Some("42P01"), None, false),
            Some(ErrorClass::TableNotFound)
        );
        assert_eq!(
            ErrorClass::from_codes(Some("42000"), Some(1064), false),
            Some(ErrorClass::Syntax)
        );
        // SQLITE_BUSY with an extended code
        assert_eq!(
            ErrorClass::from_codes(None, Some(5 | (2 << 8)), true),
            Some(ErrorClass::Locked)
        );
        assert_eq!(ErrorClass::from_codes(None, Some(19), true), None);
    }

    #[test]
    fn test_server_code_overrides_message() {
        // column "nope" does not exist
        assert_eq!(
            ErrorClass::from_codes(Some("42703"), None, false),
            Some(ErrorClass::Other)
        );
        // function f(integer) does not exist
        assert_eq!(
            ErrorClass::from_codes(Some("42883"), None, false),
            Some(ErrorClass::Other)
        );
        // FUNCTION db.f does not exist
        assert_eq!(
            ErrorClass::from_codes(Some("42000"), Some(1305), false),
            Some(ErrorClass::Other)
        );
        assert_eq!(
            ErrorClass::from_codes(Some("42S02"), Some(1146), false),
            Some(ErrorClass::TableNotFound)
        );
        assert_eq!(ErrorClass::from_codes(None, None, false), None);
    }

    #[test]
    fn test_pool_errors_convert() {
        assert!(matches!(
            DbError::from(sqlx::Error::PoolTimedOut),
            DbError::PoolExhausted { .. }
        ));
        assert!(matches!(
            DbError::from(sqlx::Error::PoolClosed),
            DbError::PoolUnavailable { .. }
        ));
    }

    #[test]
    fn test_into_exhausted() {
        let err = DbError::LockContention {
            message: "database is locked".into(),
            source: None,
        }
        .into_exhausted(5);
        match err {
            DbError::QueryExecution { message, .. } => {
                assert!(message.contains("after 5 attempts"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let passthrough = DbError::invalid_input("x").into_exhausted(5);
        assert!(matches!(passthrough, DbError::InvalidInput { .. }));
    }
}

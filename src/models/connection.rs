//! Connection-related data models.
//!
//! This module defines the supported database types and the validated
//! provider configuration used to open a connection pool.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseType {
    /// Includes MariaDB
    MySQL,
    PostgreSQL,
    SqlServer,
    /// Oracle addressed by SID (`host:port:SID`)
    Oracle,
    /// Oracle addressed by service name (`//host:port/service`)
    OracleServiceName,
    Db2,
    SQLite,
}

impl DatabaseType {
    /// All supported database types, in registry order.
    pub const ALL: [DatabaseType; 7] = [
        Self::MySQL,
        Self::PostgreSQL,
        Self::SqlServer,
        Self::Oracle,
        Self::OracleServiceName,
        Self::Db2,
        Self::SQLite,
    ];

    /// Parse a database type identifier (case-insensitive).
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_ascii_lowercase().as_str() {
            "mysql" | "my_sql" | "mariadb" => Some(Self::MySQL),
            "postgres" | "postgresql" | "postgres_sql" => Some(Self::PostgreSQL),
            "sqlserver" | "sql_server" | "mssql" => Some(Self::SqlServer),
            "oracle" | "oracle_sid" => Some(Self::Oracle),
            "oracle_service_name" => Some(Self::OracleServiceName),
            "db2" | "ibm_db2" => Some(Self::Db2),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Canonical identifier for this database type.
    pub fn id(&self) -> &'static str {
        match self {
            Self::MySQL => "mysql",
            Self::PostgreSQL => "postgresql",
            Self::SqlServer => "sqlserver",
            Self::Oracle => "oracle",
            Self::OracleServiceName => "oracle_service_name",
            Self::Db2 => "db2",
            Self::SQLite => "sqlite",
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySQL => "MySQL",
            Self::PostgreSQL => "PostgreSQL",
            Self::SqlServer => "SQL Server",
            Self::Oracle => "Oracle (SID)",
            Self::OracleServiceName => "Oracle (service name)",
            Self::Db2 => "IBM DB2",
            Self::SQLite => "SQLite",
        }
    }

    /// Embedded dialects run in-process against a local file.
    pub fn is_embedded(&self) -> bool {
        matches!(self, Self::SQLite)
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySQL => Some(3306),
            Self::PostgreSQL => Some(5432),
            Self::SqlServer => Some(1433),
            Self::Oracle | Self::OracleServiceName => Some(1521),
            Self::Db2 => Some(50000),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Username/password pair for networked dialects.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Where the database lives.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Networked server reachable at `host:port`.
    Network {
        credentials: Credentials,
        host: String,
        port: u16,
        database: String,
    },
    /// Embedded database file.
    File { path: PathBuf },
}

/// Validated configuration for a provider. Immutable once built; the only way
/// to get one is through [`networked`](Self::networked) or
/// [`embedded`](Self::embedded).
#[derive(Debug, Clone, Serialize)]
pub struct ProviderConfig {
    db_type: DatabaseType,
    endpoint: Endpoint,
}

impl ProviderConfig {
    /// Build a configuration for a networked dialect.
    ///
    /// `port` is taken as text and must parse to an integer in `(0, 65535]`.
    pub fn networked(
        db_type: DatabaseType,
        credentials: Credentials,
        host: impl Into<String>,
        port: &str,
        database: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if db_type.is_embedded() {
            return Err(ConfigError::EmbeddedRequiresFilePath(db_type));
        }

        let host = host.into();
        if host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        let port = parse_port(port)?;

        let database = database.into();
        if database.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseName);
        }

        Ok(Self {
            db_type,
            endpoint: Endpoint::Network {
                credentials,
                host: host.trim().to_string(),
                port,
                database: database.trim().to_string(),
            },
        })
    }

    /// Build a configuration for an embedded (file-based) dialect.
    pub fn embedded(db_type: DatabaseType, path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        if !db_type.is_embedded() {
            return Err(ConfigError::NetworkedRejectsFilePath(db_type));
        }

        let path = path.into();
        if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
            return Err(ConfigError::EmptyFilePath);
        }

        Ok(Self {
            db_type,
            endpoint: Endpoint::File { path },
        })
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.endpoint, Endpoint::File { .. })
    }

    /// File path for embedded configurations.
    pub fn file_path(&self) -> Option<&std::path::Path> {
        match &self.endpoint {
            Endpoint::File { path } => Some(path.as_path()),
            Endpoint::Network { .. } => None,
        }
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    let trimmed = port.trim();
    match trimmed.parse::<u32>() {
        Ok(p) if p > 0 && p <= u16::MAX as u32 => Ok(p as u16),
        _ => Err(ConfigError::InvalidPort(trimmed.to_string())),
    }
}

/// Errors raised while validating a provider configuration. Raised before any I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Server address cannot be empty")]
    EmptyHost,

    #[error("Invalid port: '{0}' (expected an integer between 1 and 65535)")]
    InvalidPort(String),

    #[error("Database name cannot be empty")]
    EmptyDatabaseName,

    #[error("Database file path cannot be empty")]
    EmptyFilePath,

    #[error("{0} is an embedded database and requires a file path, not host/port/database")]
    EmbeddedRequiresFilePath(DatabaseType),

    #[error("{0} is a networked database; a file path cannot be used")]
    NetworkedRejectsFilePath(DatabaseType),

    #[error("Invalid pool options: {0}")]
    InvalidPoolOptions(String),
}

/// Transaction state of a caller's transaction context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// No transaction open.
    None,
    Active,
}

impl TransactionState {
    /// Check if the transaction is still active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// How the last transaction in a context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_from_id() {
        assert_eq!(DatabaseType::from_id("mysql"), Some(DatabaseType::MySQL));
        assert_eq!(DatabaseType::from_id("POSTGRES"), Some(DatabaseType::PostgreSQL));
        assert_eq!(DatabaseType::from_id("mssql"), Some(DatabaseType::SqlServer));
        assert_eq!(
            DatabaseType::from_id("oracle_service_name"),
            Some(DatabaseType::OracleServiceName)
        );
        assert_eq!(DatabaseType::from_id("ibm_db2"), Some(DatabaseType::Db2));
        assert_eq!(DatabaseType::from_id(" sqlite "), Some(DatabaseType::SQLite));
        assert_eq!(DatabaseType::from_id("mongo"), None);
    }

    #[test]
    fn test_id_round_trips_through_from_id() {
        for db_type in DatabaseType::ALL {
            assert_eq!(DatabaseType::from_id(db_type.id()), Some(db_type));
        }
    }

    #[test]
    fn test_networked_config() {
        let config = ProviderConfig::networked(
            DatabaseType::PostgreSQL,
            Credentials::new("user", "secret"),
            "localhost",
            "5432",
            "app",
        )
        .unwrap();

        assert!(!config.is_embedded());
        assert_eq!(config.db_type(), DatabaseType::PostgreSQL);
        match config.endpoint() {
            Endpoint::Network { port, database, .. } => {
                assert_eq!(*port, 5432);
                assert_eq!(database, "app");
            }
            Endpoint::File { .. } => panic!("expected network endpoint"),
        }
    }

    #[test]
    fn test_embedded_config_accessors() {
        let config = ProviderConfig::embedded(DatabaseType::SQLite, "/tmp/app.db").unwrap();
        assert_eq!(config.db_type(), DatabaseType::SQLite);
        assert!(matches!(config.endpoint(), Endpoint::File { .. }));
        assert_eq!(config.file_path(), Some(std::path::Path::new("/tmp/app.db")));

        // Serialized for display only; the password never leaves the process.
        let config = ProviderConfig::networked(
            DatabaseType::MySQL,
            Credentials::new("root", "secret"),
            "db.local",
            "3306",
            "app",
        )
        .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"port\":3306"), "{}", json);
        assert!(!json.contains("secret"), "{}", json);
    }

    #[test]
    fn test_networked_config_rejects_empty_host() {
        let result = ProviderConfig::networked(
            DatabaseType::MySQL,
            Credentials::default(),
            "  ",
            "3306",
            "db",
        );
        assert!(matches!(result, Err(ConfigError::EmptyHost)));
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Server address cannot be empty")
        );
    }

    #[test]
    fn test_port_bounds() {
        for bad in ["0", "65536", "-1", "abc", ""] {
            let result = ProviderConfig::networked(
                DatabaseType::MySQL,
                Credentials::default(),
                "db.local",
                bad,
                "db",
            );
            assert!(
                matches!(result, Err(ConfigError::InvalidPort(_))),
                "port '{}' should be rejected",
                bad
            );
        }

        let ok = ProviderConfig::networked(
            DatabaseType::MySQL,
            Credentials::default(),
            "db.local",
            "65535",
            "db",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_embedded_config_rejects_empty_path() {
        let result = ProviderConfig::embedded(DatabaseType::SQLite, "");
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::EmptyFilePath));
        assert!(err.to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_dialect_class_mismatch() {
        assert!(matches!(
            ProviderConfig::embedded(DatabaseType::MySQL, "/tmp/x.db"),
            Err(ConfigError::NetworkedRejectsFilePath(DatabaseType::MySQL))
        ));
        assert!(matches!(
            ProviderConfig::networked(
                DatabaseType::SQLite,
                Credentials::default(),
                "host",
                "1",
                "db"
            ),
            Err(ConfigError::EmbeddedRequiresFilePath(DatabaseType::SQLite))
        ));
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials::new("admin", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_transaction_state() {
        assert!(TransactionState::Active.is_active());
        assert!(!TransactionState::None.is_active());
    }
}

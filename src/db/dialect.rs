//! Dialect registry.
//!
//! An immutable table, built once on first use, describing how each supported
//! database type is addressed and probed: URL prefix, default driver properties,
//! validation query and pagination strategy.
//!
//! # Architecture
//!
//! ```text
//! DatabaseType ──► profile() ──► &'static DialectProfile
//!                                   ├── connection_url(config, overrides)
//!                                   ├── driver_properties(overrides)
//!                                   └── validation_query / pagination
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use url::Url;

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Endpoint, ProviderConfig};

/// How a dialect pages through a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStrategy {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `ROW_NUMBER() OVER (...)` windowing subquery
    RowNumber,
    /// Oracle `ROWNUM` double wrap
    RowNum,
    Unsupported,
}

/// How driver properties are attached to a connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyStyle {
    /// `?key=value&key=value`
    Query,
    /// `;key=value;key=value`
    Semicolon,
    /// Applied to the connect options, not the URL.
    Programmatic,
}

/// Static description of one dialect.
#[derive(Debug)]
pub struct DialectProfile {
    pub db_type: DatabaseType,
    pub url_prefix: &'static str,
    default_properties: &'static [(&'static str, &'static str)],
    property_style: PropertyStyle,
    pub validation_query: &'static str,
    pub pagination: PaginationStrategy,
}

static REGISTRY: LazyLock<[DialectProfile; 7]> = LazyLock::new(|| {
    [
        DialectProfile {
            db_type: DatabaseType::MySQL,
            url_prefix: "mysql://",
            default_properties: &[("ssl-mode", "disabled"), ("charset", "utf8mb4")],
            property_style: PropertyStyle::Query,
            validation_query: "SELECT 1",
            pagination: PaginationStrategy::LimitOffset,
        },
        DialectProfile {
            db_type: DatabaseType::PostgreSQL,
            url_prefix: "postgres://",
            default_properties: &[
                ("sslmode", "prefer"),
                ("options", "-c TimeZone=UTC -c client_encoding=UTF8"),
            ],
            property_style: PropertyStyle::Query,
            validation_query: "SELECT 1",
            pagination: PaginationStrategy::LimitOffset,
        },
        DialectProfile {
            db_type: DatabaseType::SqlServer,
            url_prefix: "sqlserver://",
            default_properties: &[("encrypt", "true"), ("trustServerCertificate", "true")],
            property_style: PropertyStyle::Semicolon,
            validation_query: "SELECT 1",
            pagination: PaginationStrategy::RowNumber,
        },
        DialectProfile {
            db_type: DatabaseType::Oracle,
            url_prefix: "oracle:thin:@",
            default_properties: &[("oracle.jdbc.timezoneAsRegion", "false")],
            property_style: PropertyStyle::Programmatic,
            validation_query: "SELECT 1 FROM DUAL",
            pagination: PaginationStrategy::RowNum,
        },
        DialectProfile {
            db_type: DatabaseType::OracleServiceName,
            url_prefix: "oracle:thin:@//",
            default_properties: &[("oracle.jdbc.timezoneAsRegion", "false")],
            property_style: PropertyStyle::Programmatic,
            validation_query: "SELECT 1 FROM DUAL",
            pagination: PaginationStrategy::RowNum,
        },
        DialectProfile {
            db_type: DatabaseType::Db2,
            url_prefix: "db2://",
            default_properties: &[("retrieveMessagesFromServerOnGetMessage", "true")],
            property_style: PropertyStyle::Semicolon,
            validation_query: "SELECT 1 FROM SYSIBM.SYSDUMMY1",
            pagination: PaginationStrategy::Unsupported,
        },
        DialectProfile {
            db_type: DatabaseType::SQLite,
            url_prefix: "sqlite:",
            default_properties: &[("busy_timeout", "5000"), ("foreign_keys", "true")],
            property_style: PropertyStyle::Programmatic,
            validation_query: "SELECT 1",
            pagination: PaginationStrategy::LimitOffset,
        },
    ]
});

const fn registry_index(db_type: DatabaseType) -> usize {
    match db_type {
        DatabaseType::MySQL => 0,
        DatabaseType::PostgreSQL => 1,
        DatabaseType::SqlServer => 2,
        DatabaseType::Oracle => 3,
        DatabaseType::OracleServiceName => 4,
        DatabaseType::Db2 => 5,
        DatabaseType::SQLite => 6,
    }
}

/// Look up the profile of a database type.
pub fn profile(db_type: DatabaseType) -> &'static DialectProfile {
    &REGISTRY[registry_index(db_type)]
}

/// Look up a profile by its textual identifier.
pub fn profile_for_id(id: &str) -> DbResult<&'static DialectProfile> {
    DatabaseType::from_id(id)
        .map(profile)
        .ok_or_else(|| DbError::unsupported_dialect(id))
}

impl DialectProfile {
    /// Default driver properties merged with caller overrides (overrides win).
    pub fn driver_properties(&self, overrides: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut props: BTreeMap<String, String> = self
            .default_properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        props.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        props
    }

    /// Build the connection URL for a validated configuration.
    ///
    /// Credentials are embedded only for URL-style dialects (MySQL, PostgreSQL);
    /// use [`masked_connection_string`] before logging the result.
    pub fn connection_url(
        &self,
        config: &ProviderConfig,
        overrides: &BTreeMap<String, String>,
    ) -> DbResult<String> {
        if config.db_type() != self.db_type {
            return Err(DbError::invalid_input(format!(
                "Configuration is for {}, not {}",
                config.db_type(),
                self.db_type
            )));
        }

        let props = self.driver_properties(overrides);

        match config.endpoint() {
            Endpoint::File { path } => Ok(format!("{}{}", self.url_prefix, path.display())),
            Endpoint::Network {
                credentials,
                host,
                port,
                database,
            } => match self.property_style {
                PropertyStyle::Query => {
                    let base = format!("{}{}:{}/{}", self.url_prefix, host, port, database);
                    let mut url = Url::parse(&base).map_err(|e| {
                        DbError::invalid_input(format!("Invalid connection URL: {}", e))
                    })?;
                    if !credentials.username.is_empty() {
                        url.set_username(&credentials.username).map_err(|_| {
                            DbError::invalid_input("Username cannot be set on this URL")
                        })?;
                    }
                    if !credentials.password.is_empty() {
                        url.set_password(Some(&credentials.password)).map_err(|_| {
                            DbError::invalid_input("Password cannot be set on this URL")
                        })?;
                    }
                    if !props.is_empty() {
                        url.query_pairs_mut().extend_pairs(props.iter());
                    }
                    Ok(url.to_string())
                }
                PropertyStyle::Semicolon => {
                    let mut s = match self.db_type {
                        DatabaseType::SqlServer => format!(
                            "{}{}:{};databaseName={}",
                            self.url_prefix, host, port, database
                        ),
                        _ => format!("{}{}:{}/{}:", self.url_prefix, host, port, database),
                    };
                    for (k, v) in &props {
                        if !s.ends_with(';') && !s.ends_with(':') {
                            s.push(';');
                        }
                        s.push_str(&format!("{}={};", k, v));
                    }
                    Ok(s)
                }
                PropertyStyle::Programmatic => match self.db_type {
                    DatabaseType::Oracle => {
                        Ok(format!("{}{}:{}:{}", self.url_prefix, host, port, database))
                    }
                    _ => Ok(format!("{}{}:{}/{}", self.url_prefix, host, port, database)),
                },
            },
        }
    }
}

/// Get a display-safe version of a connection string (credentials masked).
pub fn masked_connection_string(connection_string: &str) -> String {
    if let (Some(at_pos), Some(scheme_pos)) =
        (connection_string.find('@'), connection_string.find("://"))
    {
        let scheme_end = scheme_pos + 3;
        if scheme_end < at_pos {
            if let Some(colon_pos) = connection_string[scheme_end..at_pos].rfind(':') {
                let colon_pos = scheme_end + colon_pos;
                let prefix = &connection_string[..colon_pos + 1];
                let suffix = &connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
    }
    connection_string.to_string()
}

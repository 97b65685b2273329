//! Configuration handling for the database access layer.
//!
//! Library callers build [`ProviderOptions`] directly. The `sql-provider` binary
//! parses a [`Config`] from CLI arguments and environment variables and turns it
//! into a [`ProviderConfig`] plus options.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::models::{ConfigError, Credentials, DatabaseType, ProviderConfig};

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_EMBEDDED: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 5;
pub const DEFAULT_MIN_CONNECTIONS_EMBEDDED: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS_EMBEDDED: u64 = 5;
pub const DEFAULT_LEAK_DETECTION_THRESHOLD_SECS: u64 = 60;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

// Metadata cache defaults
pub const DEFAULT_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

// Lock retry defaults (embedded dialects only)
pub const DEFAULT_LOCK_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_LOCK_RETRY_BACKOFF_MS: u64 = 1000;

pub const DEFAULT_VALIDATION_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 30;

/// Connection pool configuration options.
///
/// Every field is an optional override; the `*_or_default` accessors resolve it
/// against the defaults for embedded or networked dialects.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 networked, 1 embedded)
    pub max_connections: Option<u32>,
    /// Minimum idle connections kept open (default: 5 networked, 1 embedded)
    pub min_connections: Option<u32>,
    /// Connection acquire timeout in seconds (default: 30 networked, 5 embedded)
    pub acquire_timeout_secs: Option<u64>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Maximum connection lifetime in seconds (default: 1800)
    pub max_lifetime_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
    /// Checked-out time after which a connection is reported as leaked (default: 60)
    pub leak_detection_threshold_secs: Option<u64>,
    /// Embedded busy timeout in milliseconds (default: 5000)
    pub busy_timeout_ms: Option<u64>,
}

impl PoolOptions {
    /// Get max_connections with default value based on dialect class.
    ///
    /// Embedded dialects are single-writer, so the pool is always capped at one.
    pub fn max_connections_or_default(&self, embedded: bool) -> u32 {
        if embedded {
            return DEFAULT_MAX_CONNECTIONS_EMBEDDED;
        }
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value, never above the maximum.
    pub fn min_connections_or_default(&self, embedded: bool) -> u32 {
        let default = if embedded {
            DEFAULT_MIN_CONNECTIONS_EMBEDDED
        } else {
            DEFAULT_MIN_CONNECTIONS
        };
        self.min_connections
            .unwrap_or(default)
            .min(self.max_connections_or_default(embedded))
    }

    pub fn acquire_timeout_or_default(&self, embedded: bool) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs.unwrap_or(if embedded {
            DEFAULT_ACQUIRE_TIMEOUT_SECS_EMBEDDED
        } else {
            DEFAULT_ACQUIRE_TIMEOUT_SECS
        }))
    }

    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn max_lifetime_or_default(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs.unwrap_or(DEFAULT_MAX_LIFETIME_SECS))
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    pub fn leak_detection_threshold_or_default(&self) -> Duration {
        Duration::from_secs(
            self.leak_detection_threshold_secs
                .unwrap_or(DEFAULT_LEAK_DETECTION_THRESHOLD_SECS),
        )
    }

    pub fn busy_timeout_or_default(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS))
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        if self.leak_detection_threshold_secs == Some(0) {
            return Err("leak_detection_threshold must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Metadata cache sizing.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CacheOptions {
    /// Time-to-live measured from the write of an entry.
    pub ttl: Duration,
    /// Maximum entries per cache.
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Bounded retry for lock contention on embedded dialects.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_LOCK_RETRY_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_LOCK_RETRY_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

/// Tunables for a [`DatabaseProvider`](crate::provider::DatabaseProvider).
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub pool: PoolOptions,
    pub cache: CacheOptions,
    pub retry: RetryPolicy,
    /// Timeout for the validation query run by `is_connection_valid`.
    pub validation_timeout: Duration,
    /// How long `close` waits for checked-out connections to come back.
    pub close_timeout: Duration,
    /// Overrides merged over the dialect's default driver properties.
    pub driver_properties: BTreeMap<String, String>,
    /// Render binary columns as UTF-8 text when valid, instead of base64.
    pub decode_binary: bool,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            pool: PoolOptions::default(),
            cache: CacheOptions::default(),
            retry: RetryPolicy::default(),
            validation_timeout: Duration::from_secs(DEFAULT_VALIDATION_TIMEOUT_SECS),
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
            driver_properties: BTreeMap::new(),
            decode_binary: false,
        }
    }
}

impl ProviderOptions {
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_decode_binary(mut self, decode_binary: bool) -> Self {
        self.decode_binary = decode_binary;
        self
    }

    /// Override a single driver property.
    pub fn with_driver_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.driver_properties.insert(key.into(), value.into());
        self
    }

    /// Validate all options.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate().map_err(ConfigError::InvalidPoolOptions)?;
        if self.cache.capacity == 0 {
            return Err(ConfigError::InvalidPoolOptions(
                "cache capacity must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidPoolOptions(
                "retry max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// CLI configuration
// ============================================================================

/// Database type accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DbTypeArg {
    Mysql,
    Postgresql,
    Sqlserver,
    Oracle,
    OracleServiceName,
    Db2,
    Sqlite,
}

impl From<DbTypeArg> for DatabaseType {
    fn from(arg: DbTypeArg) -> Self {
        match arg {
            DbTypeArg::Mysql => DatabaseType::MySQL,
            DbTypeArg::Postgresql => DatabaseType::PostgreSQL,
            DbTypeArg::Sqlserver => DatabaseType::SqlServer,
            DbTypeArg::Oracle => DatabaseType::Oracle,
            DbTypeArg::OracleServiceName => DatabaseType::OracleServiceName,
            DbTypeArg::Db2 => DatabaseType::Db2,
            DbTypeArg::Sqlite => DatabaseType::SQLite,
        }
    }
}

/// Output format for result sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Markdown,
    Json,
}

/// Configuration for the `sql-provider` command-line tool.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "sql-provider",
    about = "Pooled SQL access with metadata caching, transactions and dialect-aware pagination",
    version,
    author
)]
pub struct Config {
    /// Database type
    #[arg(short = 't', long = "db-type", value_enum, env = "SQLP_DB_TYPE")]
    pub db_type: DbTypeArg,

    /// Server host (networked databases)
    #[arg(long, env = "SQLP_HOST")]
    pub host: Option<String>,

    /// Server port (networked databases; defaults to the dialect's standard port)
    #[arg(long, env = "SQLP_PORT")]
    pub port: Option<String>,

    /// Database name (networked databases)
    #[arg(long, env = "SQLP_DATABASE")]
    pub database: Option<String>,

    /// Username (networked databases)
    #[arg(short, long, env = "SQLP_USER", default_value = "")]
    pub user: String,

    /// Password (networked databases)
    #[arg(long, env = "SQLP_PASSWORD", default_value = "", hide_env_values = true)]
    pub password: String,

    /// Database file (embedded databases)
    #[arg(short, long, env = "SQLP_FILE")]
    pub file: Option<PathBuf>,

    /// Maximum pool size (networked databases)
    #[arg(long, env = "SQLP_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Connection acquire timeout in seconds
    #[arg(long, env = "SQLP_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: Option<u64>,

    /// Driver property override as key=value. Can be specified multiple times.
    #[arg(long = "driver-property", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub driver_properties: Vec<(String, String)>,

    /// Show binary columns as UTF-8 text when they are valid UTF-8
    #[arg(long, env = "SQLP_DECODE_BINARY")]
    pub decode_binary: bool,

    /// Output format for result sets
    #[arg(long, value_enum, default_value = "table", env = "SQLP_FORMAT")]
    pub format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "SQLP_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQLP_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a query and print the result set
    Query {
        sql: String,
        /// Log the elapsed time at info level
        #[arg(long)]
        timing: bool,
    },
    /// Run one or more statements in a single transaction
    Update {
        #[arg(required = true)]
        statements: Vec<String>,
    },
    /// Run one page of a query
    Paginate {
        sql: String,
        /// Zero-indexed page number
        #[arg(long, default_value_t = 0)]
        page: u64,
        #[arg(long, default_value_t = 20)]
        page_size: u64,
        /// Only print the generated SQL
        #[arg(long)]
        dry_run: bool,
    },
    /// List column names of a table
    Columns { table: String },
    /// Show columns, types, keys and row count of a table
    Describe { table: String },
    /// Show pool statistics
    Stats,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Build the validated provider configuration described by the flags.
    pub fn provider_config(&self) -> Result<ProviderConfig, ConfigError> {
        let db_type = DatabaseType::from(self.db_type);

        if db_type.is_embedded() {
            let path = self.file.clone().unwrap_or_default();
            return ProviderConfig::embedded(db_type, path);
        }

        if self.file.is_some() {
            return Err(ConfigError::NetworkedRejectsFilePath(db_type));
        }

        let port = match (&self.port, db_type.default_port()) {
            (Some(p), _) => p.clone(),
            (None, Some(p)) => p.to_string(),
            (None, None) => String::new(),
        };

        ProviderConfig::networked(
            db_type,
            Credentials::new(self.user.clone(), self.password.clone()),
            self.host.clone().unwrap_or_default(),
            &port,
            self.database.clone().unwrap_or_default(),
        )
    }

    /// Provider options derived from the flags.
    pub fn provider_options(&self) -> Result<ProviderOptions, ConfigError> {
        let pool = PoolOptions {
            max_connections: self.max_connections,
            acquire_timeout_secs: self.acquire_timeout,
            ..PoolOptions::default()
        };

        let options = self
            .driver_properties
            .iter()
            .fold(
                ProviderOptions::default()
                    .with_pool(pool)
                    .with_decode_binary(self.decode_binary),
                |opts, (k, v)| opts.with_driver_property(k.clone(), v.clone()),
            );

        options.validate()?;
        Ok(options)
    }
}

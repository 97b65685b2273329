//! Connection pool management.
//!
//! This module provides connection pooling using database-specific pools
//! (MySqlPool, PgPool, SqlitePool) to keep full type support.
//!
//! # Architecture
//!
//! ```text
//! ConnectionPool
//!   ├── DbPool            one bounded sqlx pool
//!   ├── waiting counter   callers blocked in acquire (statistics)
//!   ├── closed flag       new acquires fail with PoolUnavailable once set
//!   └── acquire() ──► PooledConnection { conn, LeakGuard }
//! ```
//!
//! Embedded dialects get a single-connection pool with a driver busy timeout so
//! concurrent writers serialize inside SQLite instead of failing immediately.

use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use futures_util::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::pool::{PoolConnection, PoolOptions as SqlxPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Database, Executor, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PoolOptions, ProviderOptions};
use crate::db::dialect::{self, DialectProfile, masked_connection_string};
use crate::db::params::{bind_mysql_row, bind_postgres_row, bind_sqlite_row};
use crate::db::types::to_row_set;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, PoolStatistics, ProviderConfig, RowSet, SqlValue};

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    /// Open connections, idle or in use.
    pub fn size(&self) -> u32 {
        match self {
            DbPool::MySql(pool) => pool.size(),
            DbPool::Postgres(pool) => pool.size(),
            DbPool::SQLite(pool) => pool.size(),
        }
    }

    pub fn num_idle(&self) -> usize {
        match self {
            DbPool::MySql(pool) => pool.num_idle(),
            DbPool::Postgres(pool) => pool.num_idle(),
            DbPool::SQLite(pool) => pool.num_idle(),
        }
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// A checked-out physical connection.
#[derive(Debug)]
pub enum PoolConn {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    SQLite(PoolConnection<Sqlite>),
}

/// A checked-out connection with leak detection armed.
///
/// Returned to the pool when dropped.
#[derive(Debug)]
pub struct PooledConnection {
    pub(crate) conn: PoolConn,
    _leak: LeakGuard,
}

impl PooledConnection {
    pub(crate) fn as_conn(&mut self) -> ConnRef<'_> {
        match &mut self.conn {
            PoolConn::MySql(c) => ConnRef::MySql(&mut **c),
            PoolConn::Postgres(c) => ConnRef::Postgres(&mut **c),
            PoolConn::SQLite(c) => ConnRef::SQLite(&mut **c),
        }
    }
}

/// A borrowed physical connection, pooled or inside a transaction.
///
/// Errors are returned unconverted so callers can classify them first.
pub(crate) enum ConnRef<'c> {
    MySql(&'c mut MySqlConnection),
    Postgres(&'c mut PgConnection),
    SQLite(&'c mut SqliteConnection),
}

impl ConnRef<'_> {
    /// Run a statement with positional parameters and return the affected row count.
    ///
    /// Without parameters the SQL is sent unprepared, since some statements
    /// (DDL on MySQL, for one) cannot be prepared.
    pub(crate) async fn execute(self, sql: &str, params: &[SqlValue]) -> Result<u64, sqlx::Error> {
        let rows_affected = match self {
            ConnRef::MySql(c) if params.is_empty() => c.execute(sql).await?.rows_affected(),
            ConnRef::MySql(c) => bind_mysql_row(sqlx::query(sql), params)
                .execute(c)
                .await?
                .rows_affected(),
            ConnRef::Postgres(c) if params.is_empty() => c.execute(sql).await?.rows_affected(),
            ConnRef::Postgres(c) => bind_postgres_row(sqlx::query(sql), params)
                .execute(c)
                .await?
                .rows_affected(),
            ConnRef::SQLite(c) if params.is_empty() => c.execute(sql).await?.rows_affected(),
            ConnRef::SQLite(c) => bind_sqlite_row(sqlx::query(sql), params)
                .execute(c)
                .await?
                .rows_affected(),
        };
        Ok(rows_affected)
    }

    /// Run a query and detach its rows into a [`RowSet`].
    pub(crate) async fn fetch(
        self,
        sql: &str,
        params: &[SqlValue],
        decode_binary: bool,
    ) -> Result<RowSet, sqlx::Error> {
        let started = Instant::now();
        let row_set = match self {
            ConnRef::MySql(c) => {
                let rows: Vec<MySqlRow> = if params.is_empty() {
                    c.fetch(sql).try_collect().await?
                } else {
                    bind_mysql_row(sqlx::query(sql), params)
                        .fetch(c)
                        .try_collect()
                        .await?
                };
                to_row_set(&rows, decode_binary, elapsed_ms(started))
            }
            ConnRef::Postgres(c) => {
                let rows: Vec<PgRow> = if params.is_empty() {
                    c.fetch(sql).try_collect().await?
                } else {
                    bind_postgres_row(sqlx::query(sql), params)
                        .fetch(c)
                        .try_collect()
                        .await?
                };
                to_row_set(&rows, decode_binary, elapsed_ms(started))
            }
            ConnRef::SQLite(c) => {
                let rows: Vec<SqliteRow> = if params.is_empty() {
                    c.fetch(sql).try_collect().await?
                } else {
                    bind_sqlite_row(sqlx::query(sql), params)
                        .fetch(c)
                        .try_collect()
                        .await?
                };
                to_row_set(&rows, decode_binary, elapsed_ms(started))
            }
        };
        Ok(row_set)
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Reports a probable leak when a connection stays checked out past a threshold.
///
/// Observability only: the connection is never reclaimed.
#[derive(Debug)]
pub(crate) struct LeakGuard {
    watcher: Option<JoinHandle<()>>,
}

impl LeakGuard {
    pub(crate) fn arm(threshold: Duration, db_type: DatabaseType, what: &'static str) -> Self {
        let acquired_at = Instant::now();
        let watcher = tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            warn!(
                db_type = %db_type,
                resource = what,
                held_secs = acquired_at.elapsed().as_secs(),
                threshold_secs = threshold.as_secs(),
                "Connection held longer than the leak detection threshold - probable leak"
            );
        });
        Self {
            watcher: Some(watcher),
        }
    }
}

impl Drop for LeakGuard {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Counts a caller as waiting for as long as it is alive.
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One bounded pool of physical connections owned by a provider.
#[derive(Debug)]
pub struct ConnectionPool {
    pool: DbPool,
    profile: &'static DialectProfile,
    acquire_timeout: Duration,
    leak_threshold: Duration,
    waiting: AtomicUsize,
    closed: AtomicBool,
    masked_url: String,
}

impl ConnectionPool {
    /// Open a pool for a validated configuration.
    ///
    /// Fails with `DriverUnavailable` for dialects without a native driver.
    pub async fn open(config: &ProviderConfig, options: &ProviderOptions) -> DbResult<Self> {
        options.validate()?;

        let db_type = config.db_type();
        let profile = dialect::profile(db_type);
        let url = profile.connection_url(config, &options.driver_properties)?;
        let masked_url = masked_connection_string(&url);
        let pool_opts = &options.pool;
        let embedded = db_type.is_embedded();

        info!(
            db_type = %db_type,
            url = %masked_url,
            max_connections = pool_opts.max_connections_or_default(embedded),
            "Opening connection pool"
        );

        let pool = match db_type {
            DatabaseType::MySQL => {
                let connect = MySqlConnectOptions::from_str(&url).map_err(|e| {
                    DbError::connection_invalid(
                        format!("Invalid MySQL connection options: {}", e),
                        "Check the host, port and driver properties",
                    )
                })?;
                let pool = sqlx_pool_options::<MySql>(pool_opts, embedded)
                    .connect_with(connect)
                    .await
                    .map_err(|e| connect_error(db_type, e))?;
                DbPool::MySql(pool)
            }
            DatabaseType::PostgreSQL => {
                let connect = PgConnectOptions::from_str(&url).map_err(|e| {
                    DbError::connection_invalid(
                        format!("Invalid PostgreSQL connection options: {}", e),
                        "Check the host, port and driver properties",
                    )
                })?;
                let pool = sqlx_pool_options::<Postgres>(pool_opts, embedded)
                    .connect_with(connect)
                    .await
                    .map_err(|e| connect_error(db_type, e))?;
                DbPool::Postgres(pool)
            }
            DatabaseType::SQLite => {
                let path = config.file_path().ok_or_else(|| {
                    DbError::invalid_input("SQLite configuration has no file path")
                })?;
                let connect = sqlite_connect_options(path, profile, options)?;
                let pool = sqlx_pool_options::<Sqlite>(pool_opts, embedded)
                    .connect_with(connect)
                    .await
                    .map_err(|e| connect_error(db_type, e))?;
                DbPool::SQLite(pool)
            }
            DatabaseType::SqlServer
            | DatabaseType::Oracle
            | DatabaseType::OracleServiceName
            | DatabaseType::Db2 => {
                warn!(db_type = %db_type, url = %masked_url, "No native driver for dialect");
                return Err(DbError::driver_unavailable(
                    db_type.display_name(),
                    "this build ships MySQL, PostgreSQL and SQLite drivers only",
                ));
            }
        };

        info!(db_type = %db_type, "Connection pool ready");

        Ok(Self {
            pool,
            profile,
            acquire_timeout: pool_opts.acquire_timeout_or_default(embedded),
            leak_threshold: pool_opts.leak_detection_threshold_or_default(),
            waiting: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            masked_url,
        })
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    pub fn profile(&self) -> &'static DialectProfile {
        self.profile
    }

    /// Connection URL with the password masked.
    pub fn masked_url(&self) -> &str {
        &self.masked_url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn db_pool(&self) -> &DbPool {
        &self.pool
    }

    pub(crate) fn leak_guard(&self, what: &'static str) -> LeakGuard {
        LeakGuard::arm(self.leak_threshold, self.db_type(), what)
    }

    /// Run a pool wait (acquire or begin) with waiting-caller bookkeeping and
    /// pool error mapping.
    pub(crate) async fn track_wait<T, F>(&self, fut: F) -> DbResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        if self.is_closed() {
            return Err(DbError::pool_unavailable("Connection pool has been closed"));
        }

        let _waiting = WaitGuard::enter(&self.waiting);
        fut.await.map_err(|e| match e {
            sqlx::Error::PoolTimedOut => {
                warn!(
                    db_type = %self.db_type(),
                    timeout_secs = self.acquire_timeout.as_secs(),
                    "Timed out waiting for a pooled connection"
                );
                DbError::PoolExhausted {
                    timeout_secs: self.acquire_timeout.as_secs(),
                }
            }
            other => DbError::from(other),
        })
    }

    /// Check out one connection, waiting up to the acquire timeout.
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        let conn = match &self.pool {
            DbPool::MySql(p) => PoolConn::MySql(self.track_wait(p.acquire()).await?),
            DbPool::Postgres(p) => PoolConn::Postgres(self.track_wait(p.acquire()).await?),
            DbPool::SQLite(p) => PoolConn::SQLite(self.track_wait(p.acquire()).await?),
        };
        Ok(PooledConnection {
            conn,
            _leak: self.leak_guard("connection"),
        })
    }

    /// Acquire a connection and run the dialect's validation query within `timeout`.
    pub async fn is_valid(&self, timeout: Duration) -> bool {
        if self.is_closed() {
            debug!("Validation skipped: pool closed");
            return false;
        }

        let sql = self.profile.validation_query;
        let check = async {
            let mut pooled = self.acquire().await?;
            pooled.as_conn().execute(sql, &[]).await?;
            Ok::<_, DbError>(())
        };

        match tokio::time::timeout(timeout, check).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(db_type = %self.db_type(), error = %e, "Connection validation failed");
                false
            }
            Err(_) => {
                warn!(
                    db_type = %self.db_type(),
                    timeout_secs = timeout.as_secs(),
                    "Connection validation timed out"
                );
                false
            }
        }
    }

    /// Snapshot of pool occupancy.
    pub fn statistics(&self) -> DbResult<PoolStatistics> {
        if self.is_closed() {
            return Err(DbError::pool_unavailable("Connection pool has been closed"));
        }

        let total = self.pool.size();
        let idle = u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX).min(total);
        let waiting = u32::try_from(self.waiting.load(Ordering::SeqCst)).unwrap_or(u32::MAX);

        Ok(PoolStatistics {
            active: total - idle,
            idle,
            total,
            waiting,
        })
    }

    /// Close the pool.
    ///
    /// New acquires fail immediately. Outstanding connections are given up to
    /// `timeout` to come back; after that the call returns and stragglers are
    /// closed as they are dropped. Calling `close` twice is a no-op.
    pub async fn close(&self, timeout: Duration) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!(db_type = %self.db_type(), "Connection pool already closed");
            return;
        }

        info!(db_type = %self.db_type(), "Closing connection pool");
        if tokio::time::timeout(timeout, self.pool.close()).await.is_err() {
            warn!(
                db_type = %self.db_type(),
                timeout_secs = timeout.as_secs(),
                "Timed out waiting for checked-out connections; they will close when released"
            );
        } else {
            info!(db_type = %self.db_type(), "Connection pool closed");
        }
    }

    /// Server version string, if the server reports one.
    pub async fn server_version(&self) -> Option<String> {
        let result = match &self.pool {
            DbPool::MySql(p) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(p)
                    .await
            }
            DbPool::Postgres(p) => {
                sqlx::query_scalar::<_, String>("SELECT version()")
                    .fetch_one(p)
                    .await
            }
            DbPool::SQLite(p) => {
                sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                    .fetch_one(p)
                    .await
            }
        };

        match result {
            Ok(version) => {
                debug!(version = %version, "Got server version");
                Some(version)
            }
            Err(e) => {
                warn!(error = %e, "Failed to get server version");
                None
            }
        }
    }
}

fn sqlx_pool_options<DB: Database>(opts: &PoolOptions, embedded: bool) -> SqlxPoolOptions<DB> {
    SqlxPoolOptions::<DB>::new()
        .min_connections(opts.min_connections_or_default(embedded))
        .max_connections(opts.max_connections_or_default(embedded))
        .acquire_timeout(opts.acquire_timeout_or_default(embedded))
        .idle_timeout(Some(opts.idle_timeout_or_default()))
        .max_lifetime(Some(opts.max_lifetime_or_default()))
        .test_before_acquire(opts.test_before_acquire_or_default())
}

/// SQLite connect options: the dialect's driver properties are applied as
/// connection settings and pragmas. Autocommit stays on outside explicit transactions.
fn sqlite_connect_options(
    path: &Path,
    profile: &DialectProfile,
    options: &ProviderOptions,
) -> DbResult<SqliteConnectOptions> {
    let props = profile.driver_properties(&options.driver_properties);

    let busy_timeout = match options.driver_properties.get("busy_timeout") {
        Some(ms) => Duration::from_millis(ms.parse().map_err(|_| {
            DbError::invalid_input(format!("busy_timeout must be milliseconds, got '{}'", ms))
        })?),
        None => options.pool.busy_timeout_or_default(),
    };

    let mut connect = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .busy_timeout(busy_timeout);

    for (key, value) in props {
        match key.as_str() {
            "busy_timeout" => {}
            "foreign_keys" => {
                let enabled = matches!(value.to_ascii_lowercase().as_str(), "true" | "on" | "1");
                connect = connect.foreign_keys(enabled);
            }
            _ => connect = connect.pragma(key, value),
        }
    }

    Ok(connect)
}

/// Build a connection error with a helpful suggestion.
fn connect_error(db_type: DatabaseType, error: sqlx::Error) -> DbError {
    let error_str = error.to_string().to_lowercase();

    let suggestion = if error_str.contains("connection refused") {
        format!("Check that the {} server is running and accessible", db_type)
    } else if error_str.contains("authentication") || error_str.contains("password") {
        "Verify the username and password".to_string()
    } else if error_str.contains("does not exist") || error_str.contains("unknown database") {
        "Check that the database name exists".to_string()
    } else if error_str.contains("tls") || error_str.contains("ssl") {
        "Check the TLS/SSL driver properties".to_string()
    } else if db_type.is_embedded() {
        "Verify the file path is writable".to_string()
    } else {
        format!("Verify the host and port of the {} server", db_type)
    };

    warn!(db_type = %db_type, error = %error, "Failed to open connection pool");

    match error {
        sqlx::Error::PoolTimedOut => DbError::connection_invalid(
            "Timed out connecting to the database".to_string(),
            suggestion,
        ),
        other => DbError::connection_invalid(format!("Failed to connect: {}", other), suggestion),
    }
}

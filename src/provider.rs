//! The database provider facade.
//!
//! One [`DatabaseProvider`] owns one connection pool, its metadata caches and
//! a query executor. Every operation acquires and releases pooled connections
//! internally; only a [`TransactionContext`] keeps a connection across calls.
//!
//! ```no_run
//! use sql_provider::{DatabaseProvider, DbResult};
//! use sql_provider::models::DatabaseType;
//!
//! # async fn demo() -> DbResult<()> {
//! let provider = DatabaseProvider::open_embedded(DatabaseType::SQLite, "app.db").await?;
//! provider.create_table("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").await?;
//! provider.execute_update("INSERT INTO t VALUES (1, 'a')").await?;
//! assert_eq!(provider.row_count("t").await, 1);
//! provider.close().await;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::info;

use crate::config::ProviderOptions;
use crate::db::metadata::{CacheStatistics, MetadataCache};
use crate::db::pagination::build_paginated_query;
use crate::db::pool::ConnectionPool;
use crate::db::transaction::{TransactionContext, TransactionHandle, run_in_transaction};
use crate::db::QueryExecutor;
use crate::error::DbResult;
use crate::models::{
    Credentials, DatabaseType, PaginatedQuerySpec, PoolStatistics, ProviderConfig, RowSet,
    SqlValue, TableDescription,
};

#[derive(Debug)]
pub struct DatabaseProvider {
    config: ProviderConfig,
    options: ProviderOptions,
    pool: Arc<ConnectionPool>,
    executor: QueryExecutor,
    metadata: MetadataCache,
}

impl DatabaseProvider {
    /// Open a provider for a validated configuration.
    pub async fn open(config: ProviderConfig, options: ProviderOptions) -> DbResult<Self> {
        let pool = Arc::new(ConnectionPool::open(&config, &options).await?);
        let executor = QueryExecutor::new(pool.clone(), &options);
        let metadata = MetadataCache::new(&options.cache);

        info!(db_type = %config.db_type(), url = %pool.masked_url(), "Database provider ready");

        Ok(Self {
            config,
            options,
            pool,
            executor,
            metadata,
        })
    }

    /// Open a networked provider with default options.
    ///
    /// `port` is validated as text so a malformed value is a configuration error.
    pub async fn open_networked(
        db_type: DatabaseType,
        credentials: Credentials,
        host: impl Into<String>,
        port: &str,
        database: impl Into<String>,
    ) -> DbResult<Self> {
        let config = ProviderConfig::networked(db_type, credentials, host, port, database)?;
        Self::open(config, ProviderOptions::default()).await
    }

    /// Open an embedded provider on a database file with default options.
    pub async fn open_embedded(db_type: DatabaseType, path: impl Into<PathBuf>) -> DbResult<Self> {
        let config = ProviderConfig::embedded(db_type, path)?;
        Self::open(config, ProviderOptions::default()).await
    }

    pub fn db_type(&self) -> DatabaseType {
        self.config.db_type()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    // =========================================================================
    // Pool
    // =========================================================================

    /// Run the dialect's validation query on a pooled connection.
    pub async fn is_connection_valid(&self) -> bool {
        self.pool.is_valid(self.options.validation_timeout).await
    }

    pub fn pool_statistics(&self) -> DbResult<PoolStatistics> {
        self.pool.statistics()
    }

    pub async fn server_version(&self) -> Option<String> {
        self.pool.server_version().await
    }

    /// Close the pool. Idempotent.
    pub async fn close(&self) {
        self.pool.close(self.options.close_timeout).await;
    }

    // =========================================================================
    // Queries and updates
    // =========================================================================

    pub async fn execute_query(&self, sql: &str) -> DbResult<RowSet> {
        self.executor.execute_query(sql).await
    }

    pub async fn execute_query_with(&self, sql: &str, params: &[SqlValue]) -> DbResult<RowSet> {
        self.executor.execute_query_with(sql, params).await
    }

    pub async fn execute_query_with_timing(&self, sql: &str) -> DbResult<RowSet> {
        self.executor.execute_query_with_timing(sql).await
    }

    pub async fn execute_update(&self, sql: &str) -> DbResult<bool> {
        self.executor.execute_update(sql).await
    }

    pub async fn execute_updates<S: AsRef<str>>(&self, statements: &[S]) -> DbResult<bool> {
        self.executor.execute_updates(statements).await
    }

    pub async fn execute_batch_insert(&self, sql: &str, rows: &[Vec<SqlValue>]) -> DbResult<u64> {
        self.executor.execute_batch_insert(sql, rows).await
    }

    pub async fn create_table(&self, sql: &str) -> DbResult<()> {
        self.executor.create_table(sql).await
    }

    /// Paginated SQL for any dialect, independent of this provider's own.
    pub fn build_paginated_query(
        &self,
        base_query: &str,
        page: u64,
        page_size: u64,
        db_type: DatabaseType,
    ) -> DbResult<String> {
        build_paginated_query(&PaginatedQuerySpec::new(base_query, page, page_size, db_type))
    }

    /// Run one page of `base_query` against this provider.
    pub async fn execute_paginated_query(
        &self,
        base_query: &str,
        page: u64,
        page_size: u64,
    ) -> DbResult<RowSet> {
        let sql = self.build_paginated_query(base_query, page, page_size, self.db_type())?;
        self.execute_query(&sql).await
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// A fresh context in the NONE state, owned by the caller.
    pub fn transaction_context(&self) -> TransactionContext {
        TransactionContext::new(self.pool.clone(), self.options.decode_binary)
    }

    /// Run `work` exactly once in a transaction: commit on success, roll back
    /// and return its error on failure.
    pub async fn execute_in_transaction<T, F>(&self, work: F) -> DbResult<T>
    where
        F: for<'t> FnOnce(&'t mut TransactionHandle) -> BoxFuture<'t, DbResult<T>>,
    {
        run_in_transaction(&self.pool, self.options.decode_binary, work).await
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub async fn column_names(&self, table: &str) -> Vec<String> {
        self.metadata.column_names(&self.pool, table).await
    }

    pub async fn row_count(&self, table: &str) -> u64 {
        self.metadata.row_count(&self.pool, table).await
    }

    pub async fn column_data_types(&self, table: &str) -> BTreeMap<String, String> {
        self.metadata.column_types(&self.pool, table).await
    }

    pub async fn primary_keys(&self, table: &str) -> Vec<String> {
        self.metadata.primary_keys(&self.pool, table).await
    }

    pub async fn foreign_keys(&self, table: &str) -> BTreeMap<String, String> {
        self.metadata.foreign_keys(&self.pool, table).await
    }

    pub async fn try_column_names(&self, table: &str) -> DbResult<Vec<String>> {
        self.metadata.try_column_names(&self.pool, table).await
    }

    pub async fn try_row_count(&self, table: &str) -> DbResult<u64> {
        self.metadata.try_row_count(&self.pool, table).await
    }

    pub async fn try_column_data_types(&self, table: &str) -> DbResult<BTreeMap<String, String>> {
        self.metadata.try_column_types(&self.pool, table).await
    }

    pub async fn try_primary_keys(&self, table: &str) -> DbResult<Vec<String>> {
        self.metadata.try_primary_keys(&self.pool, table).await
    }

    pub async fn try_foreign_keys(&self, table: &str) -> DbResult<BTreeMap<String, String>> {
        self.metadata.try_foreign_keys(&self.pool, table).await
    }

    pub async fn describe_table(&self, table: &str) -> DbResult<TableDescription> {
        self.metadata.try_describe(&self.pool, table).await
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.metadata.statistics()
    }

    pub fn clear_cache_for_table(&self, table: &str) {
        self.metadata.clear_table(table);
        info!(table, "Cache cleared for table");
    }

    pub fn clear_all_caches(&self) {
        self.metadata.clear_all();
        info!("All caches cleared");
    }
}

//! Cached schema metadata.
//!
//! Five independent caches (column names, row counts, column types, primary
//! keys, foreign keys) keyed by [`TableRef`]. A miss checks out one pooled
//! connection and queries the dialect's catalog.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule. Database-specific
//! loaders live in their own submodules (postgres, mysql, sqlite), each exposing
//! the same functions over a single connection.
//!
//! The plain accessors are fail-soft: a failed lookup is logged and reported as an
//! empty value. The `try_*` accessors return the error instead. Failed lookups
//! are never cached; genuine empty results are.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, error};

use crate::config::CacheOptions;
use crate::db::cache::TtlCache;
use crate::db::pool::{ConnectionPool, PoolConn};
use crate::error::DbResult;
use crate::models::{DatabaseType, TableDescription, TableRef};

/// Hit/miss counters across all five caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatistics {
    pub hits: u64,
    /// Misses that went to the database, successful or not.
    pub misses: u64,
}

#[derive(Debug)]
pub struct MetadataCache {
    column_names: TtlCache<TableRef, Vec<String>>,
    row_counts: TtlCache<TableRef, u64>,
    column_types: TtlCache<TableRef, BTreeMap<String, String>>,
    primary_keys: TtlCache<TableRef, Vec<String>>,
    foreign_keys: TtlCache<TableRef, BTreeMap<String, String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetadataCache {
    pub fn new(options: &CacheOptions) -> Self {
        Self {
            column_names: TtlCache::with_options(options),
            row_counts: TtlCache::with_options(options),
            column_types: TtlCache::with_options(options),
            primary_keys: TtlCache::with_options(options),
            foreign_keys: TtlCache::with_options(options),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn get_or_load<V, F, Fut>(
        &self,
        cache: &TtlCache<TableRef, V>,
        lookup: &'static str,
        table: &TableRef,
        load: F,
    ) -> DbResult<V>
    where
        V: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = DbResult<V>>,
    {
        if let Some(value) = cache.get(table) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(table = %table, lookup, "Metadata cache hit");
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(table = %table, lookup, "Metadata cache miss");
        let value = load().await?;
        cache.insert(table.clone(), value.clone());
        Ok(value)
    }

    // =========================================================================
    // Error-propagating accessors
    // =========================================================================

    /// Column names in declaration order.
    pub async fn try_column_names(&self, pool: &ConnectionPool, table: &str) -> DbResult<Vec<String>> {
        let table = TableRef::parse(table)?;
        self.get_or_load(&self.column_names, "column_names", &table, || async {
            let columns = load_columns(pool, &table).await?;
            Ok(columns.into_iter().map(|(name, _)| name).collect())
        })
        .await
    }

    pub async fn try_row_count(&self, pool: &ConnectionPool, table: &str) -> DbResult<u64> {
        let table = TableRef::parse(table)?;
        self.get_or_load(&self.row_counts, "row_count", &table, || {
            load_row_count(pool, &table)
        })
        .await
    }

    /// Column name to declared type name.
    pub async fn try_column_types(
        &self,
        pool: &ConnectionPool,
        table: &str,
    ) -> DbResult<BTreeMap<String, String>> {
        let table = TableRef::parse(table)?;
        self.get_or_load(&self.column_types, "column_types", &table, || async {
            Ok(load_columns(pool, &table).await?.into_iter().collect())
        })
        .await
    }

    /// Primary key columns in key order.
    pub async fn try_primary_keys(&self, pool: &ConnectionPool, table: &str) -> DbResult<Vec<String>> {
        let table = TableRef::parse(table)?;
        self.get_or_load(&self.primary_keys, "primary_keys", &table, || {
            load_primary_keys(pool, &table)
        })
        .await
    }

    /// Foreign key column to referenced table.
    pub async fn try_foreign_keys(
        &self,
        pool: &ConnectionPool,
        table: &str,
    ) -> DbResult<BTreeMap<String, String>> {
        let table = TableRef::parse(table)?;
        self.get_or_load(&self.foreign_keys, "foreign_keys", &table, || {
            load_foreign_keys(pool, &table)
        })
        .await
    }

    /// All five lookups for one table.
    pub async fn try_describe(&self, pool: &ConnectionPool, table: &str) -> DbResult<TableDescription> {
        let table_ref = TableRef::parse(table)?;
        Ok(TableDescription {
            table_name: table_ref.qualified_name(),
            columns: self.try_column_names(pool, table).await?,
            column_types: self.try_column_types(pool, table).await?,
            primary_key: self.try_primary_keys(pool, table).await?,
            foreign_keys: self.try_foreign_keys(pool, table).await?,
            row_count: self.try_row_count(pool, table).await?,
        })
    }

    // =========================================================================
    // Fail-soft accessors
    // =========================================================================

    pub async fn column_names(&self, pool: &ConnectionPool, table: &str) -> Vec<String> {
        fail_soft("column_names", table, self.try_column_names(pool, table).await)
    }

    pub async fn row_count(&self, pool: &ConnectionPool, table: &str) -> u64 {
        fail_soft("row_count", table, self.try_row_count(pool, table).await)
    }

    pub async fn column_types(&self, pool: &ConnectionPool, table: &str) -> BTreeMap<String, String> {
        fail_soft("column_types", table, self.try_column_types(pool, table).await)
    }

    pub async fn primary_keys(&self, pool: &ConnectionPool, table: &str) -> Vec<String> {
        fail_soft("primary_keys", table, self.try_primary_keys(pool, table).await)
    }

    pub async fn foreign_keys(&self, pool: &ConnectionPool, table: &str) -> BTreeMap<String, String> {
        fail_soft("foreign_keys", table, self.try_foreign_keys(pool, table).await)
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Drop every cached entry for one table.
    pub fn clear_table(&self, table: &str) {
        match TableRef::parse(table) {
            Ok(key) => {
                self.column_names.invalidate(&key);
                self.row_counts.invalidate(&key);
                self.column_types.invalidate(&key);
                self.primary_keys.invalidate(&key);
                self.foreign_keys.invalidate(&key);
                debug!(table = %key, "Cleared metadata cache for table");
            }
            Err(e) => debug!(table, error = %e, "Nothing cached for invalid table name"),
        }
    }

    pub fn clear_all(&self) {
        self.column_names.invalidate_all();
        self.row_counts.invalidate_all();
        self.column_types.invalidate_all();
        self.primary_keys.invalidate_all();
        self.foreign_keys.invalidate_all();
        debug!("Cleared all metadata caches");
    }
}

fn fail_soft<V: Default>(lookup: &'static str, table: &str, result: DbResult<V>) -> V {
    result.unwrap_or_else(|e| {
        error!(table, lookup, error = %e, "Metadata lookup failed, returning empty result");
        V::default()
    })
}

// =============================================================================
// Loaders
// =============================================================================

async fn load_columns(pool: &ConnectionPool, table: &TableRef) -> DbResult<Vec<(String, String)>> {
    let mut pooled = pool.acquire().await?;
    match &mut pooled.conn {
        PoolConn::MySql(c) => mysql::columns(c, table).await,
        PoolConn::Postgres(c) => postgres::columns(c, table).await,
        PoolConn::SQLite(c) => sqlite::columns(c, table).await,
    }
}

async fn load_primary_keys(pool: &ConnectionPool, table: &TableRef) -> DbResult<Vec<String>> {
    let mut pooled = pool.acquire().await?;
    match &mut pooled.conn {
        PoolConn::MySql(c) => mysql::primary_keys(c, table).await,
        PoolConn::Postgres(c) => postgres::primary_keys(c, table).await,
        PoolConn::SQLite(c) => sqlite::primary_keys(c, table).await,
    }
}

async fn load_foreign_keys(
    pool: &ConnectionPool,
    table: &TableRef,
) -> DbResult<BTreeMap<String, String>> {
    let mut pooled = pool.acquire().await?;
    match &mut pooled.conn {
        PoolConn::MySql(c) => mysql::foreign_keys(c, table).await,
        PoolConn::Postgres(c) => postgres::foreign_keys(c, table).await,
        PoolConn::SQLite(c) => sqlite::foreign_keys(c, table).await,
    }
}

async fn load_row_count(pool: &ConnectionPool, table: &TableRef) -> DbResult<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quoted_name(table, pool.db_type()));
    let mut pooled = pool.acquire().await?;
    let count: i64 = match &mut pooled.conn {
        PoolConn::MySql(c) => sqlx::query_scalar(&sql).fetch_one(&mut **c).await?,
        PoolConn::Postgres(c) => sqlx::query_scalar(&sql).fetch_one(&mut **c).await?,
        PoolConn::SQLite(c) => sqlx::query_scalar(&sql).fetch_one(&mut **c).await?,
    };
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Quote each part of an already-validated table reference.
///
/// SQLite names are at most `schema.table`, so the catalog is dropped there.
fn quoted_name(table: &TableRef, db_type: DatabaseType) -> String {
    let quote = match db_type {
        DatabaseType::MySQL => '`',
        _ => '"',
    };
    let catalog = match db_type {
        DatabaseType::SQLite => None,
        _ => table.catalog.as_deref(),
    };
    [catalog, table.schema.as_deref(), Some(table.table.as_str())]
        .into_iter()
        .flatten()
        .map(|part| format!("{quote}{part}{quote}"))
        .collect::<Vec<_>>()
        .join(".")
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const COLUMNS: &str = r#"
        SELECT
            c.column_name::text AS column_name,
            c.data_type::text AS data_type
        FROM information_schema.columns c
        WHERE c.table_name = $1
        AND c.table_schema = COALESCE($2, current_schema())
        ORDER BY c.ordinal_position
        "#;

        pub const PRIMARY_KEYS: &str = r#"
        SELECT kcu.column_name::text AS column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        WHERE tc.table_name = $1
        AND tc.table_schema = COALESCE($2, current_schema())
        AND tc.constraint_type = 'PRIMARY KEY'
        ORDER BY kcu.ordinal_position
        "#;

        pub const FOREIGN_KEYS: &str = r#"
        SELECT
            kcu.column_name::text AS column_name,
            ccu.table_name::text AS foreign_table_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_name = tc.constraint_name
            AND ccu.table_schema = tc.table_schema
        WHERE tc.table_name = $1
        AND tc.table_schema = COALESCE($2, current_schema())
        AND tc.constraint_type = 'FOREIGN KEY'
        "#;
    }

    pub mod mysql {
        pub const COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(DATA_TYPE USING utf8mb4) AS DATA_TYPE
        FROM information_schema.COLUMNS
        WHERE TABLE_NAME = ? AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        ORDER BY ORDINAL_POSITION
        "#;

        pub const PRIMARY_KEYS: &str = r#"
        SELECT CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_NAME = ?
        AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
        "#;

        pub const FOREIGN_KEYS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(REFERENCED_TABLE_NAME USING utf8mb4) AS REFERENCED_TABLE_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_NAME = ?
        AND TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND REFERENCED_TABLE_NAME IS NOT NULL
        "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

mod postgres {
    use super::*;
    use sqlx::{PgConnection, Row};

    pub async fn columns(conn: &mut PgConnection, table: &TableRef) -> DbResult<Vec<(String, String)>> {
        let rows = sqlx::query(queries::postgres::COLUMNS)
            .bind(&table.table)
            .bind(table.schema.as_deref())
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("column_name")?, row.try_get("data_type")?)))
            .collect()
    }

    pub async fn primary_keys(conn: &mut PgConnection, table: &TableRef) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::postgres::PRIMARY_KEYS)
            .bind(&table.table)
            .bind(table.schema.as_deref())
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| Ok(row.try_get("column_name")?))
            .collect()
    }

    pub async fn foreign_keys(
        conn: &mut PgConnection,
        table: &TableRef,
    ) -> DbResult<BTreeMap<String, String>> {
        let rows = sqlx::query(queries::postgres::FOREIGN_KEYS)
            .bind(&table.table)
            .bind(table.schema.as_deref())
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("column_name")?, row.try_get("foreign_table_name")?)))
            .collect()
    }
}

mod mysql {
    use super::*;
    use sqlx::{MySqlConnection, Row};

    /// MySQL has no separate schema level: the schema part, or else the catalog
    /// part, names the database.
    fn database(table: &TableRef) -> Option<&str> {
        table.schema.as_deref().or(table.catalog.as_deref())
    }

    pub async fn columns(
        conn: &mut MySqlConnection,
        table: &TableRef,
    ) -> DbResult<Vec<(String, String)>> {
        let rows = sqlx::query(queries::mysql::COLUMNS)
            .bind(&table.table)
            .bind(database(table))
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("COLUMN_NAME")?, row.try_get("DATA_TYPE")?)))
            .collect()
    }

    pub async fn primary_keys(conn: &mut MySqlConnection, table: &TableRef) -> DbResult<Vec<String>> {
        let rows = sqlx::query(queries::mysql::PRIMARY_KEYS)
            .bind(&table.table)
            .bind(database(table))
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| Ok(row.try_get("COLUMN_NAME")?))
            .collect()
    }

    pub async fn foreign_keys(
        conn: &mut MySqlConnection,
        table: &TableRef,
    ) -> DbResult<BTreeMap<String, String>> {
        let rows = sqlx::query(queries::mysql::FOREIGN_KEYS)
            .bind(&table.table)
            .bind(database(table))
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get("COLUMN_NAME")?,
                    row.try_get("REFERENCED_TABLE_NAME")?,
                ))
            })
            .collect()
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqliteConnection};

    /// `PRAGMA [schema.]name("table")`. SQLite schemas are attached databases.
    pub(super) fn pragma(name: &str, table: &TableRef) -> String {
        match &table.schema {
            Some(schema) => format!("PRAGMA \"{}\".{}(\"{}\")", schema, name, table.table),
            None => format!("PRAGMA {}(\"{}\")", name, table.table),
        }
    }

    pub async fn columns(
        conn: &mut SqliteConnection,
        table: &TableRef,
    ) -> DbResult<Vec<(String, String)>> {
        let rows = sqlx::query(&pragma("table_info", table))
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("name")?, row.try_get("type")?)))
            .collect()
    }

    pub async fn primary_keys(conn: &mut SqliteConnection, table: &TableRef) -> DbResult<Vec<String>> {
        let rows = sqlx::query(&pragma("table_info", table))
            .fetch_all(conn)
            .await?;

        // `pk` is the 1-based position within the key, 0 for other columns.
        let mut keyed = Vec::new();
        for row in &rows {
            let position: i64 = row.try_get("pk")?;
            if position > 0 {
                keyed.push((position, row.try_get::<String, _>("name")?));
            }
        }
        keyed.sort_by_key(|(position, _)| *position);
        Ok(keyed.into_iter().map(|(_, name)| name).collect())
    }

    pub async fn foreign_keys(
        conn: &mut SqliteConnection,
        table: &TableRef,
    ) -> DbResult<BTreeMap<String, String>> {
        let rows = sqlx::query(&pragma("foreign_key_list", table))
            .fetch_all(conn)
            .await?;

        rows.iter()
            .map(|row| Ok((row.try_get("from")?, row.try_get("table")?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_name() {
        let table = TableRef::new("users");
        assert_eq!(quoted_name(&table, DatabaseType::SQLite), "\"users\"");
        assert_eq!(quoted_name(&table, DatabaseType::MySQL), "`users`");

        let table = TableRef::new("users").with_schema("app").with_catalog("db");
        assert_eq!(
            quoted_name(&table, DatabaseType::PostgreSQL),
            "\"db\".\"app\".\"users\""
        );
        assert_eq!(
            quoted_name(&table, DatabaseType::SQLite),
            "\"app\".\"users\""
        );
    }

    #[test]
    fn test_sqlite_pragma() {
        assert_eq!(
            sqlite::pragma("table_info", &TableRef::new("t")),
            "PRAGMA table_info(\"t\")"
        );
        assert_eq!(
            sqlite::pragma("foreign_key_list", &TableRef::new("t").with_schema("aux")),
            "PRAGMA \"aux\".foreign_key_list(\"t\")"
        );
    }

    #[test]
    fn test_fail_soft_returns_default() {
        let result: DbResult<Vec<String>> = Err(crate::error::DbError::invalid_input("boom"));
        assert!(fail_soft("column_names", "t", result).is_empty());
        let result: DbResult<u64> = Ok(7);
        assert_eq!(fail_soft("row_count", "t", result), 7);
    }

    #[test]
    fn test_clear_table_ignores_invalid_names() {
        let cache = MetadataCache::new(&CacheOptions::default());
        cache.clear_table("not a table");
        cache.clear_all();
        assert_eq!(cache.statistics(), CacheStatistics::default());
    }
}

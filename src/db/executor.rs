//! Query execution engine.
//!
//! This module provides ad hoc SQL execution on top of a [`ConnectionPool`]:
//! - Pre-execution sanity checks (see [`sanitize`](crate::db::sanitize))
//! - Driver error classification into fail-soft results or typed errors
//! - Bounded lock-contention retry for embedded databases
//! - All-or-nothing multi-statement updates and batch inserts
//!
//! # Error policy
//!
//! | Driver error class | `execute_query`        | `execute_update`               |
//! |--------------------|------------------------|--------------------------------|
//! | table not found    | empty [`RowSet`]       | `QueryExecution`               |
//! | syntax             | `InvalidSqlSyntax`     | `InvalidSqlSyntax`             |
//! | locked / busy      | `QueryExecution`       | retried (embedded), then `QueryExecution` |
//! | other              | `QueryExecution`       | `QueryExecution`               |

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{ProviderOptions, RetryPolicy};
use crate::db::pool::{ConnectionPool, elapsed_ms};
use crate::db::sanitize::sanitize;
use crate::db::transaction::TransactionHandle;
use crate::error::{DbError, DbResult, ErrorClass};
use crate::models::{DatabaseType, RowSet, SqlValue};

/// Query executor that handles ad hoc SQL for one pool.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: Arc<ConnectionPool>,
    retry: RetryPolicy,
    validation_timeout: Duration,
    decode_binary: bool,
}

impl QueryExecutor {
    pub fn new(pool: Arc<ConnectionPool>, options: &ProviderOptions) -> Self {
        Self {
            pool,
            retry: options.retry,
            validation_timeout: options.validation_timeout,
            decode_binary: options.decode_binary,
        }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    /// Lock retry applies to embedded databases only.
    fn lock_retry_policy(&self) -> RetryPolicy {
        if self.db_type().is_embedded() {
            self.retry
        } else {
            RetryPolicy::no_retry()
        }
    }

    /// Run a query and return its rows detached from the connection.
    ///
    /// A query against a table that does not exist yields an empty [`RowSet`].
    pub async fn execute_query(&self, sql: &str) -> DbResult<RowSet> {
        self.execute_query_with(sql, &[]).await
    }

    /// Like [`execute_query`](Self::execute_query), with positional parameters.
    pub async fn execute_query_with(&self, sql: &str, params: &[SqlValue]) -> DbResult<RowSet> {
        let started = Instant::now();

        if !self.pool.is_valid(self.validation_timeout).await {
            error!(db_type = %self.db_type(), "Connection validation failed before query");
            return Err(DbError::connection_invalid(
                "Connection pool failed validation",
                "Check that the database is reachable and the pool has not been closed",
            ));
        }

        sanitize(sql, self.db_type()).inspect_err(|e| {
            error!(sql = %sql, error = %e, "Rejected query");
        })?;

        debug!(sql = %sql, params = params.len(), "Executing query");

        let mut conn = self.pool.acquire().await?;
        match conn.as_conn().fetch(sql, params, self.decode_binary).await {
            Ok(rows) => {
                debug!(
                    sql = %sql,
                    row_count = rows.row_count(),
                    elapsed_ms = rows.execution_time_ms,
                    "Query completed"
                );
                Ok(rows)
            }
            Err(e) => match ErrorClass::of(&e) {
                ErrorClass::TableNotFound => {
                    warn!(sql = %sql, error = %e, "Table not found, returning empty result");
                    Ok(RowSet::empty(elapsed_ms(started)))
                }
                _ => Err(classify_failure(sql, e).into_exhausted(1)),
            },
        }
    }

    /// [`execute_query`](Self::execute_query), logging the elapsed time at info level.
    pub async fn execute_query_with_timing(&self, sql: &str) -> DbResult<RowSet> {
        let started = Instant::now();
        let rows = self.execute_query(sql).await?;
        info!(
            sql = %sql,
            elapsed_ms = elapsed_ms(started),
            row_count = rows.row_count(),
            "Query executed"
        );
        Ok(rows)
    }

    /// Run one statement in autocommit mode. Returns whether any row was affected.
    ///
    /// On embedded databases a locked/busy failure is retried according to the
    /// configured [`RetryPolicy`].
    pub async fn execute_update(&self, sql: &str) -> DbResult<bool> {
        sanitize(sql, self.db_type()).inspect_err(|e| {
            error!(sql = %sql, error = %e, "Rejected update");
        })?;

        debug!(sql = %sql, "Executing update");

        let rows_affected = retry_on_lock(self.lock_retry_policy(), || async move {
            let mut conn = self.pool.acquire().await?;
            conn.as_conn()
                .execute(sql, &[])
                .await
                .map_err(|e| classify_failure(sql, e))
        })
        .await?;

        debug!(sql = %sql, rows_affected, "Update completed");
        Ok(rows_affected > 0)
    }

    /// Run several statements in one transaction, all or nothing.
    ///
    /// Returns `false` for an empty list, `true` once the transaction commits.
    pub async fn execute_updates<S: AsRef<str>>(&self, statements: &[S]) -> DbResult<bool> {
        if statements.is_empty() {
            debug!("No statements to execute");
            return Ok(false);
        }

        for sql in statements {
            sanitize(sql.as_ref(), self.db_type()).inspect_err(|e| {
                error!(sql = %sql.as_ref(), error = %e, "Rejected update");
            })?;
        }

        let mut tx = TransactionHandle::begin(&self.pool, self.decode_binary).await?;
        for sql in statements {
            if let Err(e) = tx.execute(sql.as_ref()).await {
                warn!(transaction_id = %tx.id(), error = %e, "Statement failed, rolling back");
                if let Err(rollback_err) = tx.rollback().await {
                    error!(error = %rollback_err, "Rollback failed");
                }
                return Err(e);
            }
        }
        tx.commit().await?;

        info!(statements = statements.len(), "Updates committed");
        Ok(true)
    }

    /// Run one prepared statement once per row, in a single transaction.
    ///
    /// Returns the total affected row count. Any failure rolls the whole batch back.
    pub async fn execute_batch_insert(&self, sql: &str, rows: &[Vec<SqlValue>]) -> DbResult<u64> {
        sanitize(sql, self.db_type()).inspect_err(|e| {
            error!(sql = %sql, error = %e, "Rejected batch insert");
        })?;

        if rows.is_empty() {
            debug!(sql = %sql, "Empty batch, nothing to insert");
            return Ok(0);
        }

        let started = Instant::now();
        let mut tx = TransactionHandle::begin(&self.pool, self.decode_binary).await?;
        let mut total = 0u64;

        for (index, row) in rows.iter().enumerate() {
            match tx.execute_with(sql, row).await {
                Ok(affected) => total += affected,
                Err(e) => {
                    error!(sql = %sql, row = index, error = %e, "Batch insert failed, rolling back");
                    if let Err(rollback_err) = tx.rollback().await {
                        error!(error = %rollback_err, "Rollback failed");
                    }
                    return Err(e);
                }
            }
        }
        tx.commit().await?;

        info!(
            sql = %sql,
            rows = rows.len(),
            rows_affected = total,
            elapsed_ms = elapsed_ms(started),
            "Batch insert executed"
        );
        Ok(total)
    }

    /// Run a DDL statement in autocommit mode.
    pub async fn create_table(&self, sql: &str) -> DbResult<()> {
        sanitize(sql, self.db_type()).inspect_err(|e| {
            error!(sql = %sql, error = %e, "Rejected DDL");
        })?;

        let mut conn = self.pool.acquire().await?;
        conn.as_conn()
            .execute(sql, &[])
            .await
            .map_err(|e| classify_failure(sql, e).into_exhausted(1))?;

        info!(sql = %sql, "Table created");
        Ok(())
    }
}

/// Convert a driver failure into a [`DbError`], logging it first.
fn classify_failure(sql: &str, err: sqlx::Error) -> DbError {
    let class = ErrorClass::of(&err);
    let error = match class {
        ErrorClass::Syntax => DbError::invalid_sql(err.to_string()),
        _ => DbError::from(err),
    };

    match &error {
        DbError::LockContention { .. } => debug!(sql = %sql, error = %error, "Database locked"),
        DbError::QueryExecution {
            sql_state,
            vendor_code,
            ..
        } => error!(
            sql = %sql,
            sql_state = ?sql_state,
            vendor_code = ?vendor_code,
            error = %error,
            "Statement failed"
        ),
        _ => error!(sql = %sql, error = %error, "Statement failed"),
    }
    error
}

/// Run `op`, retrying lock-contention failures with a fixed backoff.
///
/// After the last attempt the lock error is reported as a `QueryExecution`
/// error. Other errors are returned immediately.
pub(crate) async fn retry_on_lock<T, F, Fut>(policy: RetryPolicy, mut op: F) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Err(e) if e.is_lock_contention() => {
                if attempt >= max_attempts {
                    error!(attempts = attempt, error = %e, "Database still locked, giving up");
                    return Err(e.into_exhausted(attempt));
                }
                warn!(
                    attempt,
                    max_attempts,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    "Database locked, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

//! Explicit transactions.
//!
//! A [`TransactionContext`] belongs to one caller and holds at most one live
//! [`TransactionHandle`]. The handle owns a pooled connection with an open
//! transaction until it is committed or rolled back.
//!
//! ```text
//! NONE ──begin──► ACTIVE ──commit───► NONE
//!                   │
//!                   └──────rollback──► NONE
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use tracing::{debug, error, info, warn};

use crate::db::pool::{ConnRef, ConnectionPool, DbPool, LeakGuard, elapsed_ms};
use crate::db::sanitize::sanitize;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, RowSet, SqlValue, TransactionOutcome, TransactionState};

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    fn as_conn(&mut self) -> ConnRef<'_> {
        match self {
            DbTransaction::MySql(tx) => ConnRef::MySql(&mut **tx),
            DbTransaction::Postgres(tx) => ConnRef::Postgres(&mut **tx),
            DbTransaction::SQLite(tx) => ConnRef::SQLite(&mut **tx),
        }
    }

    async fn commit(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(driver_error),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(driver_error),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(driver_error),
        }
    }

    async fn rollback(self) -> DbResult<()> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(driver_error),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(driver_error),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(driver_error),
        }
    }
}

/// Map a driver failure inside a transaction. Locks are not retried here, so
/// a lock error is final.
fn driver_error(e: sqlx::Error) -> DbError {
    DbError::from(e).into_exhausted(1)
}

/// One open transaction on a dedicated pooled connection.
///
/// Dropping a handle without finishing it rolls the transaction back when the
/// connection returns to the pool.
pub struct TransactionHandle {
    id: String,
    tx: DbTransaction,
    started_at: Instant,
    decode_binary: bool,
    _leak: LeakGuard,
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.id)
            .field("db_type", &self.tx.db_type())
            .field("elapsed", &self.started_at.elapsed())
            .finish()
    }
}

impl TransactionHandle {
    /// Check out a connection and open a transaction on it.
    ///
    /// Fails with `PoolExhausted` when no connection frees up within the acquire timeout.
    pub(crate) async fn begin(pool: &ConnectionPool, decode_binary: bool) -> DbResult<Self> {
        let tx = match pool.db_pool() {
            DbPool::MySql(p) => DbTransaction::MySql(pool.track_wait(p.begin()).await?),
            DbPool::Postgres(p) => DbTransaction::Postgres(pool.track_wait(p.begin()).await?),
            DbPool::SQLite(p) => DbTransaction::SQLite(pool.track_wait(p.begin()).await?),
        };

        let handle = Self {
            id: generate_transaction_id(),
            tx,
            started_at: Instant::now(),
            decode_binary,
            _leak: pool.leak_guard("transaction"),
        };

        info!(
            transaction_id = %handle.id,
            db_type = %handle.db_type(),
            "Transaction started"
        );
        Ok(handle)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn db_type(&self) -> DatabaseType {
        self.tx.db_type()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Run a statement inside the transaction and return the affected row count.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        self.execute_with(sql, &[]).await
    }

    /// Like [`execute`](Self::execute), with positional parameters.
    pub async fn execute_with(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        sanitize(sql, self.db_type())?;

        let rows_affected = self.tx.as_conn().execute(sql, params).await.map_err(|e| {
            error!(transaction_id = %self.id, sql = %sql, error = %e, "Statement failed in transaction");
            driver_error(e)
        })?;

        debug!(
            transaction_id = %self.id,
            sql = %sql,
            rows_affected,
            "Executed in transaction"
        );
        Ok(rows_affected)
    }

    /// Run a query inside the transaction; sees the transaction's own writes.
    pub async fn query(&mut self, sql: &str) -> DbResult<RowSet> {
        self.query_with(sql, &[]).await
    }

    pub async fn query_with(&mut self, sql: &str, params: &[SqlValue]) -> DbResult<RowSet> {
        sanitize(sql, self.db_type())?;

        let rows = self
            .tx
            .as_conn()
            .fetch(sql, params, self.decode_binary)
            .await
            .map_err(|e| {
                error!(transaction_id = %self.id, sql = %sql, error = %e, "Query failed in transaction");
                driver_error(e)
            })?;

        debug!(
            transaction_id = %self.id,
            sql = %sql,
            row_count = rows.row_count(),
            "Queried in transaction"
        );
        Ok(rows)
    }

    pub(crate) async fn commit(self) -> DbResult<()> {
        let Self { id, tx, started_at, .. } = self;
        match tx.commit().await {
            Ok(()) => {
                info!(
                    transaction_id = %id,
                    elapsed_ms = elapsed_ms(started_at),
                    "Transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                error!(transaction_id = %id, error = %e, "Transaction commit failed");
                Err(e)
            }
        }
    }

    pub(crate) async fn rollback(self) -> DbResult<()> {
        let Self { id, tx, .. } = self;
        match tx.rollback().await {
            Ok(()) => {
                info!(transaction_id = %id, "Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                error!(transaction_id = %id, error = %e, "Transaction rollback failed");
                Err(e)
            }
        }
    }
}

/// Per-caller transaction state.
///
/// Not `Clone`: every method takes `&mut self`, so a context cannot be driven
/// from two places at once.
pub struct TransactionContext {
    pool: Arc<ConnectionPool>,
    decode_binary: bool,
    handle: Option<TransactionHandle>,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("state", &self.state())
            .field("handle", &self.handle)
            .finish()
    }
}

impl TransactionContext {
    pub(crate) fn new(pool: Arc<ConnectionPool>, decode_binary: bool) -> Self {
        Self {
            pool,
            decode_binary,
            handle: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        if self.handle.is_some() {
            TransactionState::Active
        } else {
            TransactionState::None
        }
    }

    /// Open a transaction. Fails if one is already active on this context.
    pub async fn begin(&mut self) -> DbResult<&mut TransactionHandle> {
        if let Some(active) = &self.handle {
            warn!(transaction_id = %active.id, "Refusing to begin a second transaction");
            return Err(DbError::transaction(format!(
                "transaction {} is already active; commit or roll it back first",
                active.id
            )));
        }

        let handle = TransactionHandle::begin(&self.pool, self.decode_binary).await?;
        Ok(self.handle.insert(handle))
    }

    /// The active transaction.
    pub fn handle(&mut self) -> DbResult<&mut TransactionHandle> {
        self.handle
            .as_mut()
            .ok_or_else(|| DbError::transaction("no active transaction"))
    }

    /// Commit and release the connection. The context is back to NONE even if
    /// the commit fails.
    pub async fn commit(&mut self) -> DbResult<TransactionOutcome> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DbError::transaction("no active transaction to commit"))?;
        handle.commit().await?;
        Ok(TransactionOutcome::Committed)
    }

    /// Roll back and release the connection. The context is back to NONE even if
    /// the rollback fails.
    pub async fn rollback(&mut self) -> DbResult<TransactionOutcome> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| DbError::transaction("no active transaction to roll back"))?;
        handle.rollback().await?;
        Ok(TransactionOutcome::RolledBack)
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            warn!(
                transaction_id = %handle.id,
                "Transaction context dropped while active; the transaction will be rolled back"
            );
        }
    }
}

/// Run `work` exactly once inside a new transaction.
///
/// Commits when `work` succeeds. When it fails the transaction is rolled back
/// and `work`'s error is returned; a rollback failure is only logged.
pub async fn run_in_transaction<T, F>(pool: &ConnectionPool, decode_binary: bool, work: F) -> DbResult<T>
where
    F: for<'t> FnOnce(&'t mut TransactionHandle) -> BoxFuture<'t, DbResult<T>>,
{
    let mut handle = TransactionHandle::begin(pool, decode_binary).await?;

    match work(&mut handle).await {
        Ok(value) => {
            handle.commit().await?;
            Ok(value)
        }
        Err(e) => {
            warn!(transaction_id = %handle.id, error = %e, "Transactional work failed, rolling back");
            if let Err(rollback_err) = handle.rollback().await {
                error!(error = %rollback_err, "Rollback after failed work also failed");
            }
            Err(e)
        }
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

//! Data models for the database access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{
    ConfigError, Credentials, DatabaseType, Endpoint, ProviderConfig, TransactionOutcome,
    TransactionState,
};
pub use query::{ColumnMetadata, PaginatedQuerySpec, PoolStatistics, RowSet, SqlValue};
pub use schema::{TableDescription, TableRef};

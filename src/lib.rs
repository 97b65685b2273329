//! SQL Provider Library
//!
//! A pooled, dialect-aware access layer for relational databases: connection
//! pooling, cached schema metadata, explicit transactions and paginated queries
//! over MySQL, PostgreSQL and SQLite, with SQL Server, Oracle and DB2 described
//! by the dialect registry.

pub mod config;
pub mod db;
pub mod error;
pub mod format;
pub mod models;
pub mod provider;

pub use config::{Config, ProviderOptions};
pub use error::{DbError, DbResult};
pub use provider::DatabaseProvider;

//! Database access layer.
//!
//! This module provides:
//! - The dialect registry
//! - Connection pool management with leak detection
//! - TTL-bounded schema metadata caches
//! - Explicit transactions
//! - Query execution with error classification and lock retry
//! - Dialect-aware pagination
//! - Type mappings between driver rows and detached result sets

pub mod cache;
pub mod dialect;
pub mod executor;
pub mod metadata;
pub mod pagination;
pub mod params;
pub mod pool;
pub mod sanitize;
pub mod transaction;
pub mod types;

pub use dialect::{DialectProfile, PaginationStrategy, profile, profile_for_id};
pub use executor::QueryExecutor;
pub use metadata::{CacheStatistics, MetadataCache};
pub use pagination::build_paginated_query;
pub use pool::{ConnectionPool, DbPool, PooledConnection};
pub use transaction::{TransactionContext, TransactionHandle};

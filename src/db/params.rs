//! Positional binding of [`SqlValue`]s to driver queries.

use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Postgres, Sqlite};

use crate::models::SqlValue;

/// Bind every value of a row to a MySQL query, in order.
pub(crate) fn bind_mysql_row<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    row: &'q [SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for value in row {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Bytes(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// Bind every value of a row to a PostgreSQL query, in order.
///
/// NULL is bound as a text-typed null; non-text columns need an explicit cast in the SQL.
pub(crate) fn bind_postgres_row<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    row: &'q [SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for value in row {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Bytes(v) => query.bind(v.as_slice()),
        };
    }
    query
}

/// Bind every value of a row to a SQLite query, in order.
pub(crate) fn bind_sqlite_row<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    row: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in row {
        query = match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Float(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
            SqlValue::Bytes(v) => query.bind(v.as_slice()),
        };
    }
    query
}

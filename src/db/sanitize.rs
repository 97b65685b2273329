//! Pre-execution SQL sanity checks.
//!
//! Catches obviously broken input before it reaches a connection: blank text,
//! statements truncated after `WHERE`/`FROM`/`AND`/`OR`, and several statements
//! stacked into one call. The check is lexical only. It runs the
//! [sqlparser](https://docs.rs/sqlparser/) tokenizer for the target dialect so
//! that keywords inside string literals, quoted identifiers and comments are not
//! mistaken for SQL.

use sqlparser::dialect::{
    Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;

/// Get the tokenizer dialect for the given database type.
pub(crate) fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
        DatabaseType::SqlServer => Box::new(MsSqlDialect {}),
        DatabaseType::Oracle | DatabaseType::OracleServiceName | DatabaseType::Db2 => {
            Box::new(GenericDialect {})
        }
    }
}

/// Validate that `sql` is a single, complete-looking statement.
///
/// A single trailing `;` is accepted. Every rejection is
/// [`DbError::InvalidSqlSyntax`].
///
/// # Examples
///
/// ```
/// use sql_provider::db::sanitize::sanitize;
/// use sql_provider::models::DatabaseType;
///
/// assert!(sanitize("SELECT * FROM t WHERE id = 1;", DatabaseType::SQLite).is_ok());
/// assert!(sanitize("SELECT * FROM t WHERE;", DatabaseType::SQLite).is_err());
/// assert!(sanitize("SELECT 1; SELECT 2", DatabaseType::SQLite).is_err());
/// ```
pub fn sanitize(sql: &str, db_type: DatabaseType) -> DbResult<()> {
    if sql.trim().is_empty() {
        return Err(DbError::invalid_sql("invalid SQL: statement is empty"));
    }

    let dialect = get_dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize()
        .map_err(|e| DbError::invalid_sql(format!("invalid SQL: {}", e)))?;

    let significant: Vec<&Token> = tokens
        .iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect();

    // Only one semicolon is allowed, and only as the final token.
    let body: &[&Token] = match significant.split_last() {
        Some((Token::SemiColon, rest)) => rest,
        _ => &significant,
    };

    if body.is_empty() {
        return Err(DbError::invalid_sql("invalid SQL: statement is empty"));
    }

    if body.iter().any(|t| matches!(t, Token::SemiColon)) {
        return Err(DbError::invalid_sql(
            "invalid SQL: multiple statements are not allowed in a single call",
        ));
    }

    if let Some(Token::Word(word)) = body.last() {
        let dangling = word.quote_style.is_none()
            && matches!(
                word.keyword,
                Keyword::WHERE | Keyword::FROM | Keyword::AND | Keyword::OR
            );
        if dangling {
            return Err(DbError::invalid_sql(format!(
                "invalid SQL: syntax error, statement ends with dangling '{}'",
                word.value.to_uppercase()
            )));
        }
    }

    Ok(())
}

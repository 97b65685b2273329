//! Dialect-aware pagination.
//!
//! Pure SQL string construction; nothing here touches a connection.
//!
//! Oracle numbers rows in the order the base query produces them, so the base
//! query needs an `ORDER BY` for pages to be stable. SQL Server does not allow
//! `ORDER BY` in a derived table, so a trailing top-level `ORDER BY` is moved
//! out of the base query into the `ROW_NUMBER() OVER (...)` clause. There it
//! can only see the base query's output columns: order by output column names
//! or aliases, not by table-qualified names that are not selected. Without a
//! movable `ORDER BY` rows are numbered in an unspecified order.

use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, Tokenizer};

use crate::db::dialect::{self, PaginationStrategy};
use crate::db::sanitize::get_dialect;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, PaginatedQuerySpec};

/// Build the SQL for one page of `spec.base_query`.
///
/// # Examples
///
/// ```
/// use sql_provider::db::pagination::build_paginated_query;
/// use sql_provider::models::{DatabaseType, PaginatedQuerySpec};
///
/// let spec = PaginatedQuerySpec::new("SELECT * FROM t ORDER BY id", 2, 10, DatabaseType::SQLite);
/// assert_eq!(
///     build_paginated_query(&spec).unwrap(),
///     "SELECT * FROM t ORDER BY id LIMIT 10 OFFSET 20"
/// );
/// ```
pub fn build_paginated_query(spec: &PaginatedQuerySpec) -> DbResult<String> {
    if spec.page_size == 0 {
        return Err(DbError::invalid_input("page size must be greater than 0"));
    }

    let base = trim_statement(&spec.base_query);
    if base.is_empty() {
        return Err(DbError::invalid_input("base query cannot be empty"));
    }

    let start = spec.start();
    let end = spec.end();

    match dialect::profile(spec.db_type).pagination {
        PaginationStrategy::LimitOffset => Ok(format!(
            "{} LIMIT {} OFFSET {}",
            base, spec.page_size, start
        )),
        PaginationStrategy::RowNumber => {
            let (inner, ordering) = match split_order_by(base, spec.db_type) {
                Some((inner, ordering)) => (inner, ordering),
                None => (base, "(SELECT NULL)"),
            };
            Ok(format!(
                "SELECT * FROM (SELECT ROW_NUMBER() OVER (ORDER BY {}) AS RowNum, * \
                 FROM ({}) AS BaseQuery) AS RowConstrainedResult \
                 WHERE RowNum > {} AND RowNum <= {} ORDER BY RowNum",
                ordering, inner, start, end
            ))
        }
        PaginationStrategy::RowNum => Ok(format!(
            "SELECT * FROM (SELECT a.*, ROWNUM rnum FROM ({}) a WHERE ROWNUM <= {}) WHERE rnum > {}",
            base, end, start
        )),
        PaginationStrategy::Unsupported => Err(DbError::unsupported_operation(
            "pagination",
            spec.db_type.display_name(),
        )),
    }
}

/// Split a trailing top-level `ORDER BY` off `sql`, returning the query without
/// it and the ordering list.
///
/// Returns `None` when there is no such clause, or when it is followed by
/// `OFFSET`, `FETCH` or `FOR` (the clause is then legal inside a derived table
/// and stays where it is).
fn split_order_by(sql: &str, db_type: DatabaseType) -> Option<(&str, &str)> {
    let dialect = get_dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize_with_location()
        .ok()?;

    let mut depth = 0i32;
    // (ORDER token index, index of the first token after BY)
    let mut clause: Option<(usize, usize)> = None;
    for (i, tok) in tokens.iter().enumerate() {
        match &tok.token {
            Token::LParen => depth += 1,
            Token::RParen => depth -= 1,
            Token::Word(word) if depth == 0 && word.quote_style.is_none() => match word.keyword {
                Keyword::ORDER => {
                    let by = tokens[i + 1..]
                        .iter()
                        .position(|t| !matches!(t.token, Token::Whitespace(_)))
                        .map(|n| i + 1 + n);
                    if let Some(by) = by {
                        if let Token::Word(next) = &tokens[by].token {
                            if next.keyword == Keyword::BY {
                                clause = Some((i, by + 1));
                            }
                        }
                    }
                }
                Keyword::OFFSET | Keyword::FETCH | Keyword::FOR if clause.is_some() => {
                    return None;
                }
                _ => {}
            },
            _ => {}
        }
    }

    let (order, after_by) = clause?;
    let order_at = byte_offset(sql, tokens[order].span.start)?;
    let ordering_at = match tokens.get(after_by) {
        Some(tok) => byte_offset(sql, tok.span.start)?,
        None => sql.len(),
    };

    let inner = sql[..order_at].trim_end();
    let ordering = sql[ordering_at..].trim();
    if inner.is_empty() || ordering.is_empty() {
        return None;
    }
    Some((inner, ordering))
}

/// Byte offset of a 1-based tokenizer location (line, character column).
fn byte_offset(sql: &str, location: Location) -> Option<usize> {
    let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
    let column = usize::try_from(location.column).ok()?.checked_sub(1)?;

    let mut line_start = 0;
    for (n, text) in sql.split_inclusive('\n').enumerate() {
        if n == line {
            return text
                .char_indices()
                .map(|(i, _)| line_start + i)
                .chain(std::iter::once(line_start + text.len()))
                .nth(column);
        }
        line_start += text.len();
    }
    None
}

/// Strip surrounding whitespace and trailing semicolons so the query can be wrapped.
fn trim_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

//! Schema-related data models.
//!
//! This module defines the table identity used as the metadata cache key and
//! the aggregated table description shown by the CLI.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// Composite table identity: `catalog.schema.table`, `schema.table` or a bare name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
}

impl TableRef {
    /// Create a reference to a bare table name.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            table: table.into(),
        }
    }

    /// Set the schema name.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Parse a dot-separated table identity, validating every part.
    ///
    /// Each part must match `[A-Za-z_][A-Za-z0-9_$]*`; at most three parts are accepted.
    pub fn parse(input: &str) -> DbResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DbError::invalid_input("Table name cannot be empty"));
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        for part in &parts {
            if !is_plain_identifier(part) {
                return Err(DbError::invalid_input(format!(
                    "Invalid identifier '{}' in table name '{}'",
                    part, trimmed
                )));
            }
        }

        Ok(match parts.as_slice() {
            [table] => Self::new(*table),
            [schema, table] => Self::new(*table).with_schema(*schema),
            [catalog, schema, table] => Self::new(*table)
                .with_schema(*schema)
                .with_catalog(*catalog),
            _ => {
                return Err(DbError::invalid_input(format!(
                    "Table name '{}' has more than three parts",
                    trimmed
                )));
            }
        })
    }

    /// Get the fully qualified table name.
    pub fn qualified_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{}.", catalog)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        write!(f, "{}", self.table)
    }
}

impl std::str::FromStr for TableRef {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Everything the metadata cache knows about one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: String,
    pub columns: Vec<String>,
    /// Column name to driver-reported type name.
    pub column_types: BTreeMap<String, String>,
    pub primary_key: Vec<String>,
    /// Foreign key column to referenced table.
    pub foreign_keys: BTreeMap<String, String>,
    pub row_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_name() {
        let t = TableRef::parse("users").unwrap();
        assert_eq!(t, TableRef::new("users"));
        assert_eq!(t.qualified_name(), "users");
    }

    #[test]
    fn test_parse_qualified() {
        let t = TableRef::parse("public.orders").unwrap();
        assert_eq!(t.schema.as_deref(), Some("public"));
        assert_eq!(t.table, "orders");

        let t: TableRef = "main.app.order_items".parse().unwrap();
        assert_eq!(t.catalog.as_deref(), Some("main"));
        assert_eq!(t.qualified_name(), "main.app.order_items");
    }

    #[test]
    fn test_parse_rejects_bad_identifiers() {
        for bad in [
            "",
            "  ",
            "users; DROP TABLE x",
            "1table",
            "a.b.c.d",
            "users.",
            "\"quoted\"",
            "t--",
        ] {
            assert!(TableRef::parse(bad).is_err(), "'{}' should be rejected", bad);
        }
    }

    #[test]
    fn test_dollar_allowed_after_first_char() {
        assert!(TableRef::parse("tmp$log").is_ok());
        assert!(TableRef::parse("$tmp").is_err());
    }
}

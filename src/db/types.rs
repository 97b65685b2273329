//! Row decoding into detached JSON rows.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Per-driver decoders extract the value, sharing generic cell helpers
//!
//! SQLite is dynamically typed, so its decoder dispatches on the runtime type
//! of each value rather than the declared column type.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

use crate::models::{ColumnMetadata, DatabaseType, RowSet};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    /// Dates, times and timestamps
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.starts_with("timestamp")
        || matches!(lower.as_str(), "datetime" | "date" | "time" | "timetz")
    {
        return TypeCategory::Temporal;
    }

    let integer_like = lower.contains("int") && !lower.contains("interval") && !lower.contains("point");
    if integer_like || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value, kept as the database's own text representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Encode binary data as a JSON value.
///
/// With `decode_binary`, valid UTF-8 is returned as text. Everything else is base64.
pub fn decode_binary_value(bytes: &[u8], decode_binary: bool) -> JsonValue {
    if decode_binary {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return JsonValue::String(s.to_string());
        }
    }
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_to_json(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Generic cell helpers
// =============================================================================

/// Decode one cell as `Option<T>`; `None` on NULL or on a type mismatch.
fn cell<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn bool_cell<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
{
    cell::<R, bool>(row, idx)
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn bytes_cell<'r, R>(row: &'r R, idx: usize, decode_binary: bool) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    cell::<R, Vec<u8>>(row, idx)
        .map(|v| decode_binary_value(&v, decode_binary))
        .unwrap_or(JsonValue::Null)
}

fn text_cell<'r, R>(row: &'r R, idx: usize, type_name: &str) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    match cell::<R, String>(row, idx) {
        Some(v) if type_name.to_lowercase().contains("json") => {
            serde_json::from_str::<JsonValue>(&v).unwrap_or(JsonValue::String(v))
        }
        Some(v) => JsonValue::String(v),
        None => JsonValue::Null,
    }
}

fn temporal_cell<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: Row,
    usize: ColumnIndex<R>,
    chrono::DateTime<chrono::Utc>: Decode<'r, R::Database> + Type<R::Database>,
    chrono::NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    chrono::NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    chrono::NaiveTime: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    if let Some(v) = cell::<R, chrono::DateTime<chrono::Utc>>(row, idx) {
        return JsonValue::String(v.to_rfc3339());
    }
    if let Some(v) = cell::<R, chrono::NaiveDateTime>(row, idx) {
        return JsonValue::String(v.format("%Y-%m-%d %H:%M:%S%.f").to_string());
    }
    if let Some(v) = cell::<R, chrono::NaiveDate>(row, idx) {
        return JsonValue::String(v.to_string());
    }
    if let Some(v) = cell::<R, chrono::NaiveTime>(row, idx) {
        return JsonValue::String(v.to_string());
    }
    text_cell(row, idx, "")
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Conversion of a driver row into a detached JSON map.
pub trait RowToJson: Row {
    fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue>;

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns()
            .iter()
            .map(|col| {
                // Result-set columns carry no reliable nullability information.
                ColumnMetadata::new(col.name(), col.type_info().name(), true)
            })
            .collect()
    }
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::MySQL);
                let value = mysql::decode_column(self, idx, type_name, category, decode_binary);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, idx, type_name, category, decode_binary);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self, decode_binary: bool) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let declared = col.type_info().name();
                let value = sqlite::decode_column(self, idx, declared, decode_binary);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

/// Collect driver rows into a [`RowSet`].
pub fn to_row_set<R: RowToJson>(rows: &[R], decode_binary: bool, execution_time_ms: u64) -> RowSet {
    let columns = rows
        .first()
        .map(RowToJson::column_metadata)
        .unwrap_or_default();

    RowSet {
        columns,
        rows: rows.iter().map(|r| r.to_json_map(decode_binary)).collect(),
        execution_time_ms,
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => bool_cell(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => bytes_cell(row, idx, decode_binary),
            TypeCategory::Json => cell::<_, JsonValue>(row, idx).unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => temporal_cell(row, idx),
            _ => decode_text(row, idx, type_name, decode_binary),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to decode DECIMAL");
                JsonValue::Null
            }
        }
    }

    /// MySQL reports signedness only through the type info, so try every width.
    fn decode_integer(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Some(v) = cell::<_, i64>(row, idx) {
            return JsonValue::Number(v.into());
        }
        if let Some(v) = cell::<_, u64>(row, idx) {
            return JsonValue::Number(v.into());
        }
        if let Some(v) = cell::<_, i32>(row, idx) {
            return JsonValue::Number(v.into());
        }
        if let Some(v) = cell::<_, u32>(row, idx) {
            return JsonValue::Number(v.into());
        }
        if let Some(v) = cell::<_, i16>(row, idx) {
            return JsonValue::Number(v.into());
        }
        if let Some(v) = cell::<_, u16>(row, idx) {
            return JsonValue::Number(v.into());
        }
        if let Some(v) = cell::<_, i8>(row, idx) {
            return JsonValue::Number(v.into());
        }
        cell::<_, u8>(row, idx)
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> JsonValue {
        if let Some(v) = cell::<_, f64>(row, idx) {
            return float_to_json(v);
        }
        cell::<_, f32>(row, idx)
            .map(|v| float_to_json(f64::from(v)))
            .unwrap_or(JsonValue::Null)
    }

    /// Text columns with a binary collation arrive as bytes.
    fn decode_text(row: &MySqlRow, idx: usize, type_name: &str, decode_binary: bool) -> JsonValue {
        match text_cell(row, idx, type_name) {
            JsonValue::Null => match cell::<_, Vec<u8>>(row, idx) {
                Some(bytes) => match String::from_utf8(bytes) {
                    Ok(s) => JsonValue::String(s),
                    Err(e) => decode_binary_value(e.as_bytes(), decode_binary),
                },
                None => JsonValue::Null,
            },
            value => value,
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        decode_binary: bool,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => bool_cell(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => bytes_cell(row, idx, decode_binary),
            TypeCategory::Json => cell::<_, JsonValue>(row, idx).unwrap_or(JsonValue::Null),
            TypeCategory::Uuid => cell::<_, sqlx::types::Uuid>(row, idx)
                .map(|u| JsonValue::String(u.to_string()))
                .unwrap_or(JsonValue::Null),
            TypeCategory::Temporal => temporal_cell(row, idx),
            TypeCategory::Unknown => text_cell(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!(column = idx, error = %e, "Failed to decode NUMERIC");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Some(v) = cell::<_, i64>(row, idx) {
            return JsonValue::Number(v.into());
        }
        if let Some(v) = cell::<_, i32>(row, idx) {
            return JsonValue::Number(v.into());
        }
        cell::<_, i16>(row, idx)
            .map(|v| JsonValue::Number(v.into()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Some(v) = cell::<_, f64>(row, idx) {
            return float_to_json(v);
        }
        cell::<_, f32>(row, idx)
            .map(|v| float_to_json(f64::from(v)))
            .unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        declared: &str,
        decode_binary: bool,
    ) -> JsonValue {
        let runtime = match row.try_get_raw(idx) {
            Ok(value) if value.is_null() => return JsonValue::Null,
            Ok(value) => value.type_info().name().to_uppercase(),
            Err(_) => return JsonValue::Null,
        };

        if categorize_type(declared, DatabaseType::SQLite) == TypeCategory::Boolean
            && runtime == "INTEGER"
        {
            return bool_cell(row, idx);
        }

        match runtime.as_str() {
            "INTEGER" => cell::<_, i64>(row, idx)
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or(JsonValue::Null),
            "REAL" => cell::<_, f64>(row, idx)
                .map(float_to_json)
                .unwrap_or(JsonValue::Null),
            "BLOB" => bytes_cell(row, idx, decode_binary),
            _ => text_cell(row, idx, declared),
        }
    }
}

//! Decoding of native rows into JSON values.
//!
//! Type conversion uses a two-phase approach:
//! 1. [`TypeCategory`] classifies a column's native type name
//! 2. backend-specific decoders extract the value for that category
//!
//! NULL is detected before either phase. A non-NULL value that no decoder
//! understands is reported as a per-row error rather than silently dropped.

use crate::error::{DbError, DbResult, ErrorKind};
use crate::models::Backend;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

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
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a native type name such as `INT4`, `BIGINT UNSIGNED` or `VARCHAR(64)`.
pub fn categorize_type(type_name: &str, backend: Backend) -> TypeCategory {
    let lower = type_name.trim().to_ascii_lowercase();
    let base = lower.split('(').next().unwrap_or_default().trim();
    let base = base.trim_end_matches(" unsigned").trim();

    match base {
        // SQLite's NUMERIC affinity stores integers or reals, never exact decimals
        "numeric" if backend == Backend::Sqlite => TypeCategory::Float,
        "numeric" | "decimal" | "dec" => TypeCategory::Decimal,
        "bool" | "boolean" => TypeCategory::Boolean,
        "int2" | "int4" | "int8" | "smallint" | "integer" | "int" | "bigint" | "tinyint"
        | "mediumint" | "smallserial" | "serial" | "bigserial" | "year" | "oid" => {
            TypeCategory::Integer
        }
        "float4" | "float8" | "real" | "float" | "double" | "double precision" => {
            TypeCategory::Float
        }
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "timestamptz" | "timestamp" | "datetime" | "date" | "time" => TypeCategory::Temporal,
        "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary" | "varbinary" => {
            TypeCategory::Binary
        }
        "text" | "varchar" | "char" | "bpchar" | "name" | "citext" | "character"
        | "character varying" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set"
        | "clob" | "nvarchar" | "nchar" => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

// =============================================================================
// Exact numerics
// =============================================================================

/// DECIMAL/NUMERIC rendered exactly as a string.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_ascii_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // MySQL sends DECIMAL as text in both protocols
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("numeric")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(pg_numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

/// Render Postgres' binary NUMERIC (base-10000 digit groups) as decimal text.
pub(crate) fn pg_numeric_to_string(bytes: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    const NUMERIC_NEG: u16 = 0x4000;
    const NUMERIC_NAN: u16 = 0xC000;
    const NUMERIC_PINF: u16 = 0xD000;
    const NUMERIC_NINF: u16 = 0xF000;

    let read = |at: usize| -> Result<i16, sqlx::error::BoxDynError> {
        bytes
            .get(at..at + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = usize::try_from(read(0)?).map_err(|_| "negative NUMERIC digit count")?;
    let weight = i32::from(read(2)?);
    let sign = read(4)? as u16;
    let dscale = usize::from(read(6)? as u16);

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| read(8 + i * 2))
        .collect::<Result<Vec<_>, _>>()?;
    let group = |k: i32| -> i16 {
        usize::try_from(k)
            .ok()
            .and_then(|k| digits.get(k).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for k in 0..=weight {
            if k == 0 {
                out.push_str(&group(k).to_string());
            } else {
                out.push_str(&format!("{:04}", group(k)));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut k = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", group(k)));
            k += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

// =============================================================================
// Value helpers
// =============================================================================

fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<T, _>(idx).ok()
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Binary payloads as base64; UTF-8 without control characters as text.
pub fn bytes_to_json(bytes: &[u8], prefer_text: bool) -> JsonValue {
    if prefer_text {
        if let Ok(s) = std::str::from_utf8(bytes) {
            if !s.chars().any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r')) {
                return JsonValue::String(s.to_string());
            }
        }
    }
    JsonValue::String(STANDARD.encode(bytes))
}

fn text_value(s: String, parse_json: bool) -> JsonValue {
    if parse_json {
        if let Ok(json) = serde_json::from_str::<JsonValue>(&s) {
            return json;
        }
    }
    JsonValue::String(s)
}

// =============================================================================
// Row decoding
// =============================================================================

/// Native rows that can be decoded into column names and JSON values.
pub trait DecodeRow {
    fn column_names(&self) -> Vec<String>;
    fn decode_values(&self) -> DbResult<Vec<JsonValue>>;
}

type ColumnDecoder<R> = fn(&R, usize, &str, TypeCategory) -> Option<JsonValue>;

fn decode_row<R>(row: &R, backend: Backend, decode: ColumnDecoder<R>) -> DbResult<Vec<JsonValue>>
where
    R: Row,
    usize: ColumnIndex<R>,
{
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let is_null = row
                .try_get_raw(idx)
                .map_err(|e| {
                    DbError::wrap(
                        ErrorKind::QueryFailed,
                        format!("failed to read column {:?}", col.name()),
                        e,
                    )
                })?
                .is_null();
            if is_null {
                return Ok(JsonValue::Null);
            }
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, backend);
            decode(row, idx, type_name, category).ok_or_else(|| {
                DbError::query_failed(format!(
                    "cannot decode column {:?} of type {}",
                    col.name(),
                    type_name
                ))
            })
        })
        .collect()
}

fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

impl DecodeRow for PgRow {
    fn column_names(&self) -> Vec<String> {
        column_names(self)
    }

    fn decode_values(&self) -> DbResult<Vec<JsonValue>> {
        decode_row(self, Backend::Postgres, postgres::decode_column)
    }
}

impl DecodeRow for MySqlRow {
    fn column_names(&self) -> Vec<String> {
        column_names(self)
    }

    fn decode_values(&self) -> DbResult<Vec<JsonValue>> {
        decode_row(self, Backend::MySql, mysql::decode_column)
    }
}

impl DecodeRow for SqliteRow {
    fn column_names(&self) -> Vec<String> {
        column_names(self)
    }

    fn decode_values(&self) -> DbResult<Vec<JsonValue>> {
        decode_row(self, Backend::Sqlite, sqlite::decode_column)
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::types::Oid;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> Option<JsonValue> {
        let value = match category {
            TypeCategory::Integer => get::<_, i64>(row, idx)
                .or_else(|| get::<_, i32>(row, idx).map(i64::from))
                .or_else(|| get::<_, i16>(row, idx).map(i64::from))
                .or_else(|| get::<_, Oid>(row, idx).map(|oid| i64::from(oid.0)))
                .map(JsonValue::from),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float_value),
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|d| JsonValue::String(d.0)),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Json => get::<_, JsonValue>(row, idx),
            TypeCategory::Uuid => {
                get::<_, uuid::Uuid>(row, idx).map(|u| JsonValue::String(u.to_string()))
            }
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|b| bytes_to_json(&b, false)),
            TypeCategory::Text => get::<_, String>(row, idx).map(JsonValue::String),
            TypeCategory::Unknown => None,
        };
        value.or_else(|| decode_raw(row, idx, type_name))
    }

    fn decode_temporal(row: &PgRow, idx: usize) -> Option<JsonValue> {
        get::<_, DateTime<Utc>>(row, idx)
            .map(|v| v.to_rfc3339())
            .or_else(|| {
                get::<_, NaiveDateTime>(row, idx).map(|v| v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            })
            .or_else(|| get::<_, NaiveDate>(row, idx).map(|v| v.to_string()))
            .or_else(|| get::<_, NaiveTime>(row, idx).map(|v| v.to_string()))
            .map(JsonValue::String)
    }

    /// Enums, domains and other custom types: text format as-is, binary as
    /// text when it looks like text.
    fn decode_raw(row: &PgRow, idx: usize, type_name: &str) -> Option<JsonValue> {
        let raw = row.try_get_raw(idx).ok()?;
        match raw.format() {
            PgValueFormat::Text => raw.as_str().ok().map(|s| JsonValue::String(s.to_string())),
            PgValueFormat::Binary => {
                let bytes = raw.as_bytes().ok()?;
                tracing::trace!(type_name, len = bytes.len(), "Decoding PostgreSQL value from raw bytes");
                Some(bytes_to_json(bytes, true))
            }
        }
    }
}

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> Option<JsonValue> {
        let value = match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float_value),
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|d| JsonValue::String(d.0)),
            TypeCategory::Boolean => get::<_, bool>(row, idx)
                .map(JsonValue::Bool)
                .or_else(|| decode_integer(row, idx)),
            TypeCategory::Json => get::<_, JsonValue>(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|b| bytes_to_json(&b, false)),
            TypeCategory::Text | TypeCategory::Uuid => get::<_, String>(row, idx)
                .map(|s| text_value(s, type_name.eq_ignore_ascii_case("json"))),
            TypeCategory::Unknown => None,
        };
        value.or_else(|| {
            row.try_get_unchecked::<Vec<u8>, _>(idx)
                .ok()
                .map(|b| bytes_to_json(&b, true))
        })
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
        get::<_, i64>(row, idx)
            .map(JsonValue::from)
            .or_else(|| get::<_, u64>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, i32>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, u32>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, i16>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, u16>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, i8>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, u8>(row, idx).map(JsonValue::from))
            .or_else(|| row.try_get_unchecked::<u16, _>(idx).ok().map(JsonValue::from))
    }

    fn decode_temporal(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
        get::<_, DateTime<Utc>>(row, idx)
            .map(|v| v.to_rfc3339())
            .or_else(|| {
                get::<_, NaiveDateTime>(row, idx).map(|v| v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            })
            .or_else(|| get::<_, NaiveDate>(row, idx).map(|v| v.to_string()))
            .or_else(|| get::<_, NaiveTime>(row, idx).map(|v| v.to_string()))
            .map(JsonValue::String)
    }
}

mod sqlite {
    use super::*;

    /// SQLite values carry their storage class at runtime, so the declared
    /// type only picks the preferred reading.
    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> Option<JsonValue> {
        let preferred = match category {
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Json => {
                get::<_, String>(row, idx).map(|s| text_value(s, true))
            }
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|b| bytes_to_json(&b, false)),
            _ => None,
        };
        preferred
            .or_else(|| get::<_, i64>(row, idx).map(JsonValue::from))
            .or_else(|| get::<_, f64>(row, idx).map(float_value))
            .or_else(|| {
                get::<_, String>(row, idx)
                    .map(|s| text_value(s, type_name.to_ascii_lowercase().contains("json")))
            })
            .or_else(|| get::<_, Vec<u8>>(row, idx).map(|b| bytes_to_json(&b, false)))
            .or_else(|| {
                row.try_get_unchecked::<String, _>(idx)
                    .ok()
                    .map(JsonValue::String)
            })
    }
}

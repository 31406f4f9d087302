//! Query-related data models.
//!
//! This module defines the structured list request accepted from API layers and
//! the parameterized query produced for execution.

use crate::builder::SelectBuilder;
use crate::error::{DbError, DbResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Placeholder convention of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Numbered markers: `$1`, `$2`, ...
    Postgres,
    /// Repeated `?`
    MySql,
    /// Repeated `?`
    Sqlite,
}

impl Dialect {
    /// Placeholder for the argument at 1-based `position`.
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Self::Postgres => format!("${position}"),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }

    /// Whether the dialect understands `ILIKE` natively.
    pub fn supports_ilike(&self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Whether OFFSET may appear without a preceding LIMIT.
    pub fn allows_bare_offset(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

/// A positional argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum SqlArg {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    Text(String),
    /// Arrays and objects
    Json(JsonValue),
}

impl SqlArg {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
        }
    }

    /// Parse a loosely typed literal as found in query strings.
    ///
    /// `null`, `true`, `false`, integers and finite floats are typed; anything
    /// else stays text.
    pub fn parse_literal(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if raw.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Int(v);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && raw.chars().any(|c| c.is_ascii_digit()) => Self::Float(v),
            _ => Self::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for SqlArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! sql_arg_from_int {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for SqlArg {
                fn from(v: $ty) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )+
    };
}

sql_arg_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for SqlArg {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f32> for SqlArg {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<f64> for SqlArg {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlArg {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlArg {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlArg>> From<Option<T>> for SqlArg {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<JsonValue> for SqlArg {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Json(JsonValue::Number(n)), Self::Float),
            },
            JsonValue::String(s) => Self::Text(s),
            other => Self::Json(other),
        }
    }
}

/// SQL text plus its positional arguments, ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

/// Comparison operators accepted in WHERE clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Like,
    ILike,
}

impl Operator {
    /// Match a caller-supplied token against the allow-list.
    ///
    /// Accepts the SQL tokens (`=`, `!=`, `<>`, `<`, `>`, `<=`, `>=`, `LIKE`,
    /// `ILIKE`) and the named aliases used by list requests (`eq`, `neq`, `lt`,
    /// `gt`, `lte`, `gte`, `like`, `ilike`). Keywords are case-insensitive.
    pub fn parse(token: &str) -> Option<Self> {
        let op = match token.trim().to_ascii_lowercase().as_str() {
            "=" | "eq" => Self::Eq,
            "!=" | "<>" | "neq" | "ne" => Self::NotEq,
            "<" | "lt" => Self::Lt,
            ">" | "gt" => Self::Gt,
            "<=" | "lte" | "le" => Self::LtEq,
            ">=" | "gte" | "ge" => Self::GtEq,
            "like" => Self::Like,
            "ilike" => Self::ILike,
            _ => return None,
        };
        Some(op)
    }

    /// SQL token for `dialect`.
    pub fn as_sql(&self, dialect: Dialect) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::LtEq => "<=",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            // MySQL and SQLite compare case-insensitively under their default collations
            Self::ILike if dialect.supports_ilike() => "ILIKE",
            Self::ILike => "LIKE",
        }
    }
}

/// Sort direction for ORDER BY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(DbError::invalid_input(format!(
                "invalid sort direction {other:?}, expected asc or desc"
            ))),
        }
    }
}

/// One AND-ed condition of a list request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Filter {
    pub column: String,
    /// SQL token or named alias, validated when the query is built
    #[serde(alias = "op")]
    pub operator: String,
    pub value: SqlArg,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: impl Into<String>, value: impl Into<SqlArg>) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }

    /// Parse the compact `column:operator:value` form.
    ///
    /// The value may itself contain `:`.
    pub fn parse(expr: &str) -> DbResult<Self> {
        let mut parts = expr.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(column), Some(operator), Some(value)) if !column.trim().is_empty() => {
                if Operator::parse(operator).is_none() {
                    return Err(DbError::invalid_input(format!(
                        "unsupported operator {operator:?} in filter {expr:?}"
                    )));
                }
                Ok(Self::new(column.trim(), operator.trim(), SqlArg::parse_literal(value)))
            }
            _ => Err(DbError::invalid_input(format!(
                "invalid filter {expr:?}, expected column:operator:value"
            ))),
        }
    }
}

/// One ORDER BY entry of a list request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SortField {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortField {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    /// Parse `column` or `column:asc|desc`.
    pub fn parse(expr: &str) -> DbResult<Self> {
        let (column, direction) = match expr.rsplit_once(':') {
            Some((column, dir)) => (column, dir.parse()?),
            None => (expr, SortDirection::Asc),
        };
        if column.trim().is_empty() {
            return Err(DbError::invalid_input(format!("invalid sort {expr:?}")));
        }
        Ok(Self::new(column.trim(), direction))
    }
}

/// Structured list request consumed from API layers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ListOptions {
    pub table: String,
    /// Empty selects all columns
    #[serde(default, alias = "fields")]
    pub columns: Vec<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub sort: Vec<SortField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl ListOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Feed this request into a [`SelectBuilder`] for `dialect`.
    pub fn to_builder(&self, dialect: Dialect) -> SelectBuilder {
        let mut builder = SelectBuilder::new(&self.table, dialect).columns(&self.columns);
        for filter in &self.filters {
            builder = builder.and_where(&filter.column, &filter.operator, filter.value.clone());
        }
        for field in &self.sort {
            builder = builder.order_by(&field.column, field.direction);
        }
        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(offset) = self.offset {
            builder = builder.offset(offset);
        }
        builder
    }

    pub fn build(&self, dialect: Dialect) -> DbResult<Query> {
        self.to_builder(dialect).build()
    }
}

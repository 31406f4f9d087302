//! Dialect-aware SELECT construction.
//!
//! Values supplied through [`SelectBuilder::and_where`], [`SelectBuilder::limit`]
//! and [`SelectBuilder::offset`] always become positional arguments. The
//! comparison operator cannot be bound as a parameter, so it is checked
//! against [`Operator::parse`]'s allow-list before it reaches the SQL text.
//! Identifiers are always double-quoted; MySQL sessions opened by this crate
//! run with `ANSI_QUOTES` so the same quoting works there.
//!
//! ```
//! use datri::builder::select;
//! use datri::models::Dialect;
//!
//! let query = select("t", Dialect::Postgres)
//!     .and_where("a", "=", 1)
//!     .limit(5)
//!     .build()
//!     .unwrap();
//! assert_eq!(query.sql, r#"SELECT * FROM "t" WHERE "a" = $1 LIMIT $2"#);
//! ```

use crate::error::{DbError, DbResult};
use crate::models::{Dialect, Operator, Query, SortDirection, SqlArg};

/// Quote an identifier, doubling embedded quote characters.
pub fn quote_ident(name: &str) -> DbResult<String> {
    if name.is_empty() {
        return Err(DbError::invalid_input("identifier must not be empty"));
    }
    if name.contains('\0') {
        return Err(DbError::invalid_input(format!(
            "identifier {name:?} contains a NUL character"
        )));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Start a SELECT over `table`.
pub fn select(table: impl Into<String>, dialect: Dialect) -> SelectBuilder {
    SelectBuilder::new(table, dialect)
}

#[derive(Debug, Clone)]
struct Condition {
    column: String,
    operator: Operator,
    value: SqlArg,
}

#[derive(Debug, Clone)]
struct Ordering {
    column: String,
    direction: SortDirection,
}

/// Fluent builder for conjunctive, parameterized SELECT statements.
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    table: String,
    dialect: Dialect,
    columns: Vec<String>,
    conditions: Vec<Condition>,
    orderings: Vec<Ordering>,
    limit: Option<u64>,
    offset: Option<u64>,
    error: Option<DbError>,
}

impl SelectBuilder {
    pub fn new(table: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            table: table.into(),
            dialect,
            columns: Vec::new(),
            conditions: Vec::new(),
            orderings: Vec::new(),
            limit: None,
            offset: None,
            error: None,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Restrict the selected columns. Without this call every column is selected.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.columns
            .extend(columns.into_iter().map(|c| c.as_ref().to_string()));
        self
    }

    /// Add `column operator value`, AND-ed with earlier conditions.
    ///
    /// An operator outside the allow-list is remembered and reported by
    /// [`build`](Self::build).
    pub fn and_where(
        mut self,
        column: impl AsRef<str>,
        operator: impl AsRef<str>,
        value: impl Into<SqlArg>,
    ) -> Self {
        let token = operator.as_ref();
        match Operator::parse(token) {
            Some(operator) => self.conditions.push(Condition {
                column: column.as_ref().to_string(),
                operator,
                value: value.into(),
            }),
            None => self.fail(DbError::invalid_input(format!(
                "unsupported operator {token:?}"
            ))),
        }
        self
    }

    pub fn order_by(mut self, column: impl AsRef<str>, direction: SortDirection) -> Self {
        self.orderings.push(Ordering {
            column: column.as_ref().to_string(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    fn fail(&mut self, err: DbError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Render the SQL text and its arguments.
    pub fn build(self) -> DbResult<Query> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if self.table.trim().is_empty() {
            return Err(DbError::invalid_input("table name is required"));
        }

        let dialect = self.dialect;
        let mut args: Vec<SqlArg> = Vec::with_capacity(self.conditions.len() + 2);
        let next_placeholder = |args: &mut Vec<SqlArg>, value: SqlArg| {
            args.push(value);
            dialect.placeholder(args.len())
        };

        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<DbResult<Vec<_>>>()?
                .join(", ")
        };

        let mut sql = format!("SELECT {} FROM {}", projection, quote_ident(&self.table)?);

        if !self.conditions.is_empty() {
            let mut clauses = Vec::with_capacity(self.conditions.len());
            for condition in self.conditions {
                let column = quote_ident(&condition.column)?;
                let placeholder = next_placeholder(&mut args, condition.value);
                clauses.push(format!(
                    "{} {} {}",
                    column,
                    condition.operator.as_sql(dialect),
                    placeholder
                ));
            }
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        if !self.orderings.is_empty() {
            let terms = self
                .orderings
                .iter()
                .map(|o| Ok(format!("{} {}", quote_ident(&o.column)?, o.direction.as_sql())))
                .collect::<DbResult<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        let limit = match (self.limit, self.offset) {
            (None, Some(_)) if !dialect.allows_bare_offset() => Some(i64::MAX),
            (Some(limit), _) => Some(to_arg(limit, "limit")?),
            (None, _) => None,
        };
        if let Some(limit) = limit {
            let placeholder = next_placeholder(&mut args, SqlArg::Int(limit));
            sql.push_str(" LIMIT ");
            sql.push_str(&placeholder);
        }
        if let Some(offset) = self.offset {
            let placeholder = next_placeholder(&mut args, SqlArg::Int(to_arg(offset, "offset")?));
            sql.push_str(" OFFSET ");
            sql.push_str(&placeholder);
        }

        Ok(Query { sql, args })
    }
}

fn to_arg(value: u64, what: &str) -> DbResult<i64> {
    i64::try_from(value).map_err(|_| DbError::invalid_input(format!("{what} {value} is out of range")))
}

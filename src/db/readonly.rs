//! SQL statement validation for read-only enforcement.
//!
//! Ad hoc SQL is parsed with [sqlparser](https://docs.rs/sqlparser/) using the
//! backend's dialect, so formatting tricks cannot smuggle a write past the
//! check. Only queries (`SELECT`, `WITH … SELECT`, set operations, `VALUES`)
//! and `EXPLAIN` of a query are accepted.
//!
//! MySQL sessions run with `ANSI_QUOTES`, so they are parsed with the generic
//! dialect, which reads double quotes as identifiers.

use crate::error::{DbError, DbResult, ErrorKind};
use crate::models::Backend;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::{self, GenericDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

fn parser_dialect(backend: Backend) -> Box<dyn dialect::Dialect> {
    match backend {
        Backend::Postgres => Box::new(PostgreSqlDialect {}),
        Backend::MySql => Box::new(GenericDialect {}),
        Backend::Sqlite => Box::new(SQLiteDialect {}),
    }
}

/// Reject anything but read-only queries.
///
/// Returns `PermissionDenied` for a writing or administrative statement and
/// `QueryFailed` when the text does not parse.
///
/// # Examples
///
/// ```
/// use datri::db::readonly::validate_readonly;
/// use datri::models::Backend;
///
/// assert!(validate_readonly("SELECT * FROM users", Backend::Postgres).is_ok());
/// assert!(validate_readonly("DELETE FROM users", Backend::Postgres).is_err());
/// ```
pub fn validate_readonly(sql: &str, backend: Backend) -> DbResult<()> {
    let dialect = parser_dialect(backend);
    let statements = Parser::parse_sql(dialect.as_ref(), sql)
        .map_err(|e| DbError::wrap(ErrorKind::QueryFailed, "failed to parse SQL statement", e))?;

    if statements.is_empty() {
        return Err(DbError::query_failed("empty SQL statement"));
    }

    for stmt in &statements {
        if !is_read_only(stmt) {
            return Err(DbError::permission_denied(format!(
                "{} is not allowed on a read-only connection",
                statement_name(stmt)
            )));
        }
    }
    Ok(())
}

fn is_read_only(stmt: &Statement) -> bool {
    match stmt {
        Statement::Query(query) => is_read_only_query(query),
        Statement::Explain { statement, .. } => is_read_only(statement),
        _ => false,
    }
}

/// Postgres allows data-modifying CTEs and `SELECT … INTO`; row locks also
/// take write locks.
fn is_read_only_query(query: &Query) -> bool {
    let ctes_read_only = query
        .with
        .as_ref()
        .is_none_or(|with| with.cte_tables.iter().all(|cte| is_read_only_query(&cte.query)));
    ctes_read_only && query.locks.is_empty() && is_read_only_set_expr(&query.body)
}

fn is_read_only_set_expr(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_only_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_read_only_set_expr(left) && is_read_only_set_expr(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}

fn statement_name(stmt: &Statement) -> String {
    match stmt {
        Statement::Query(_) => "a writing query".to_string(),
        Statement::Explain { statement, .. } => format!("EXPLAIN of {}", statement_name(statement)),
        other => other
            .to_string()
            .split_whitespace()
            .next()
            .unwrap_or("statement")
            .to_ascii_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied(sql: &str, backend: Backend) -> bool {
        matches!(
            validate_readonly(sql, backend),
            Err(e) if e.kind() == ErrorKind::PermissionDenied
        )
    }

    #[test]
    fn test_select_variants_allowed() {
        for sql in [
            "SELECT 1",
            "select * from users where id = $1",
            "WITH t AS (SELECT 1 AS n) SELECT n FROM t",
            "SELECT 1 UNION ALL SELECT 2",
            "VALUES (1, 'a'), (2, 'b')",
            "EXPLAIN SELECT * FROM users",
        ] {
            assert!(validate_readonly(sql, Backend::Postgres).is_ok(), "{sql}");
        }
    }

    #[test]
    fn test_builder_output_allowed_on_every_backend() {
        assert!(validate_readonly(r#"SELECT "id" FROM "users" WHERE "age" >= $1 LIMIT $2"#, Backend::Postgres).is_ok());
        assert!(validate_readonly(r#"SELECT "id" FROM "users" WHERE "age" >= ? LIMIT ?"#, Backend::MySql).is_ok());
        assert!(validate_readonly(r#"SELECT "id" FROM "users" WHERE "age" >= ? LIMIT ?"#, Backend::Sqlite).is_ok());
    }

    #[test]
    fn test_writes_denied() {
        for backend in [Backend::Postgres, Backend::MySql, Backend::Sqlite] {
            assert!(denied("INSERT INTO users (id) VALUES (1)", backend));
            assert!(denied("UPDATE users SET name = 'x'", backend));
            assert!(denied("DELETE FROM users", backend));
            assert!(denied("DROP TABLE users", backend));
            assert!(denied("CREATE TABLE t (id INT)", backend));
        }
    }

    #[test]
    fn test_hidden_writes_denied() {
        assert!(denied("SELECT 1; DELETE FROM users", Backend::Postgres));
        assert!(denied("EXPLAIN DELETE FROM users", Backend::Postgres));
        assert!(
            validate_readonly(
                "WITH gone AS (DELETE FROM users RETURNING id) SELECT * FROM gone",
                Backend::Postgres
            )
            .is_err()
        );
        assert!(denied("SELECT * INTO backup FROM users", Backend::Postgres));
        assert!(denied("SELECT * FROM users FOR UPDATE", Backend::Postgres));
    }

    #[test]
    fn test_unparseable_is_query_failed() {
        let err = validate_readonly("SELEC wat", Backend::Postgres).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert_eq!(
            validate_readonly("", Backend::Sqlite).unwrap_err().kind(),
            ErrorKind::QueryFailed
        );
    }

    #[test]
    fn test_denial_names_statement() {
        let err = validate_readonly("DELETE FROM users", Backend::MySql).unwrap_err();
        assert!(err.message().starts_with("DELETE"), "{}", err.message());
    }
}

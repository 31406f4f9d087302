//! Binding of [`SqlArg`] values to backend-specific queries.
//!
//! Values are always sent as bound parameters, never spliced into SQL text.

use crate::models::SqlArg;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

pub(crate) fn bind_postgres<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    arg: &'q SqlArg,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match arg {
        SqlArg::Null => query.bind(None::<String>),
        SqlArg::Bool(v) => query.bind(*v),
        SqlArg::Int(v) => query.bind(*v),
        SqlArg::Float(v) => query.bind(*v),
        SqlArg::Text(v) => query.bind(v.as_str()),
        SqlArg::Json(v) => query.bind(Json(v)),
    }
}

pub(crate) fn bind_mysql<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    arg: &'q SqlArg,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match arg {
        SqlArg::Null => query.bind(None::<String>),
        SqlArg::Bool(v) => query.bind(*v),
        SqlArg::Int(v) => query.bind(*v),
        SqlArg::Float(v) => query.bind(*v),
        SqlArg::Text(v) => query.bind(v.as_str()),
        SqlArg::Json(v) => query.bind(Json(v)),
    }
}

pub(crate) fn bind_sqlite<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    arg: &'q SqlArg,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match arg {
        SqlArg::Null => query.bind(None::<String>),
        SqlArg::Bool(v) => query.bind(*v),
        SqlArg::Int(v) => query.bind(*v),
        SqlArg::Float(v) => query.bind(*v),
        SqlArg::Text(v) => query.bind(v.as_str()),
        // no native JSON storage class
        SqlArg::Json(v) => query.bind(v.to_string()),
    }
}

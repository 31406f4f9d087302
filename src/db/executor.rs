//! Query execution under a request context.
//!
//! Every driver future is raced against the [`Context`]. Driver errors go
//! through the error translator; interruptions become `Timeout`.
//!
//! Each backend module below provides the same interface adapted to its
//! driver types. When a query has no arguments it is sent as plain text,
//! which lets statements that cannot be prepared still run.
//!
//! At most `max_rows` rows are buffered; a result that goes past the cap
//! stops iterating with a deferred `QueryFailed`.

use crate::context::Context;
use crate::db::classify::translate;
use crate::db::rows::{Row, Rows};
use crate::db::types::DecodeRow;
use crate::error::{DbError, DbResult};
use crate::models::{Backend, SqlArg};
use futures_util::{Stream, StreamExt};
use sqlx::{Column, Statement};
use std::future::Future;
use tracing::{debug, warn};

/// Await `fut` under `ctx`, translating driver failures with `message`.
pub(crate) async fn run_guarded<T, F>(
    ctx: &Context,
    backend: Backend,
    message: &str,
    fut: F,
) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match ctx.guard(fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(translate(backend, ctx, e, message)),
        Err(interrupted) => Err(interrupted.into_error(message)),
    }
}

async fn collect_rows<R, S>(ctx: &Context, backend: Backend, stream: S, max_rows: u64) -> DbResult<Rows>
where
    R: DecodeRow,
    S: Stream<Item = Result<R, sqlx::Error>> + Unpin,
{
    match ctx.guard(drain(ctx, backend, stream, max_rows)).await {
        Ok(rows) => rows,
        Err(interrupted) => Err(interrupted.into_error("query interrupted")),
    }
}

/// Read the stream to the end. A failure before the first row fails the
/// call; a later one is deferred onto the returned [`Rows`].
async fn drain<R, S>(ctx: &Context, backend: Backend, mut stream: S, max_rows: u64) -> DbResult<Rows>
where
    R: DecodeRow,
    S: Stream<Item = Result<R, sqlx::Error>> + Unpin,
{
    let mut columns = Vec::new();
    let mut rows = Vec::new();

    while let Some(next) = stream.next().await {
        let decoded = match next {
            Ok(_) if rows.len() as u64 >= max_rows => Err(DbError::query_failed(format!(
                "result exceeds max_rows ({max_rows})"
            ))),
            Ok(row) => {
                if rows.is_empty() {
                    columns = row.column_names();
                }
                row.decode_values()
            }
            Err(e) => Err(translate(backend, ctx, e, "query failed")),
        };
        match decoded {
            Ok(values) => rows.push(values),
            Err(e) if rows.is_empty() => return Err(e),
            Err(e) => {
                warn!(rows = rows.len(), error = %e, "Result iteration stopped early");
                return Ok(Rows::from_parts(columns, rows, Some(e)));
            }
        }
    }

    debug!(rows = rows.len(), "Query complete");
    Ok(Rows::from_parts(columns, rows, None))
}

/// Fill in column names for a result that produced no rows, using the
/// prepared statement's metadata. Statements that cannot be described keep
/// an empty column list.
async fn describe_empty<'q, S, F, P>(ctx: &Context, mut rows: Rows, prepare: P) -> Rows
where
    S: Statement<'q>,
    F: Future<Output = Result<S, sqlx::Error>>,
    P: FnOnce() -> F,
{
    if !rows.columns().is_empty() || rows.err().is_some() {
        return rows;
    }
    match ctx.guard(prepare()).await {
        Ok(Ok(statement)) => {
            rows.set_columns(statement.columns().iter().map(|c| c.name().to_string()).collect());
        }
        Ok(Err(e)) => debug!(error = %e, "Result columns unavailable"),
        Err(_) => {}
    }
    rows
}

async fn first_row<R, F>(ctx: &Context, backend: Backend, fut: F) -> Row
where
    R: DecodeRow,
    F: Future<Output = Result<Option<R>, sqlx::Error>>,
{
    match run_guarded(ctx, backend, "query failed", fut).await {
        Ok(Some(row)) => match row.decode_values() {
            Ok(values) => Row::from_parts(row.column_names(), values),
            Err(e) => Row::from_error(e),
        },
        Ok(None) => Row::empty(),
        Err(e) => Row::from_error(e),
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

pub(crate) mod postgres {
    use super::*;
    use crate::db::params::bind_postgres;
    use sqlx::{Executor, PgPool};

    pub async fn fetch_rows(
        ctx: &Context,
        pool: &PgPool,
        sql: &str,
        args: &[SqlArg],
        max_rows: u64,
    ) -> DbResult<Rows> {
        debug!(sql, args = args.len(), "Executing query");
        let rows = if args.is_empty() {
            collect_rows(ctx, Backend::Postgres, pool.fetch(sql), max_rows).await?
        } else {
            let mut q = sqlx::query(sql);
            for arg in args {
                q = bind_postgres(q, arg);
            }
            collect_rows(ctx, Backend::Postgres, q.fetch(pool), max_rows).await?
        };
        Ok(describe_empty(ctx, rows, || pool.prepare(sql)).await)
    }

    pub async fn fetch_row(ctx: &Context, pool: &PgPool, sql: &str, args: &[SqlArg]) -> Row {
        debug!(sql, args = args.len(), "Executing single-row query");
        if args.is_empty() {
            return first_row(ctx, Backend::Postgres, pool.fetch_optional(sql)).await;
        }
        let mut q = sqlx::query(sql);
        for arg in args {
            q = bind_postgres(q, arg);
        }
        first_row(ctx, Backend::Postgres, q.fetch_optional(pool)).await
    }
}

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::bind_mysql;
    use sqlx::{Executor, MySqlPool};

    pub async fn fetch_rows(
        ctx: &Context,
        pool: &MySqlPool,
        sql: &str,
        args: &[SqlArg],
        max_rows: u64,
    ) -> DbResult<Rows> {
        debug!(sql, args = args.len(), "Executing query");
        let rows = if args.is_empty() {
            collect_rows(ctx, Backend::MySql, pool.fetch(sql), max_rows).await?
        } else {
            let mut q = sqlx::query(sql);
            for arg in args {
                q = bind_mysql(q, arg);
            }
            collect_rows(ctx, Backend::MySql, q.fetch(pool), max_rows).await?
        };
        Ok(describe_empty(ctx, rows, || pool.prepare(sql)).await)
    }

    pub async fn fetch_row(ctx: &Context, pool: &MySqlPool, sql: &str, args: &[SqlArg]) -> Row {
        debug!(sql, args = args.len(), "Executing single-row query");
        if args.is_empty() {
            return first_row(ctx, Backend::MySql, pool.fetch_optional(sql)).await;
        }
        let mut q = sqlx::query(sql);
        for arg in args {
            q = bind_mysql(q, arg);
        }
        first_row(ctx, Backend::MySql, q.fetch_optional(pool)).await
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite;
    use sqlx::{Executor, SqlitePool};

    pub async fn fetch_rows(
        ctx: &Context,
        pool: &SqlitePool,
        sql: &str,
        args: &[SqlArg],
        max_rows: u64,
    ) -> DbResult<Rows> {
        debug!(sql, args = args.len(), "Executing query");
        let rows = if args.is_empty() {
            collect_rows(ctx, Backend::Sqlite, pool.fetch(sql), max_rows).await?
        } else {
            let mut q = sqlx::query(sql);
            for arg in args {
                q = bind_sqlite(q, arg);
            }
            collect_rows(ctx, Backend::Sqlite, q.fetch(pool), max_rows).await?
        };
        Ok(describe_empty(ctx, rows, || pool.prepare(sql)).await)
    }

    pub async fn fetch_row(ctx: &Context, pool: &SqlitePool, sql: &str, args: &[SqlArg]) -> Row {
        debug!(sql, args = args.len(), "Executing single-row query");
        if args.is_empty() {
            return first_row(ctx, Backend::Sqlite, pool.fetch_optional(sql)).await;
        }
        let mut q = sqlx::query(sql);
        for arg in args {
            q = bind_sqlite(q, arg);
        }
        first_row(ctx, Backend::Sqlite, q.fetch_optional(pool)).await
    }
}

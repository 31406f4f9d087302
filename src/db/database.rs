//! Connection facade.
//!
//! [`Database`] is the one contract every backend satisfies. Each backend has
//! a concrete facade owning its sqlx pool, its [`Config`] and a tracing span;
//! [`AnyDatabase`] picks one at runtime from `config.driver`.
//!
//! Every backend-touching operation runs under the caller's [`Context`]
//! narrowed by `config.query_timeout`.

use crate::config::Config;
use crate::context::Context;
use crate::db::executor::{self, run_guarded};
use crate::db::rows::{Record, Row, Rows, scan_rows};
use crate::db::{pool, readonly, schema};
use crate::error::{DbError, DbResult};
use crate::models::{Backend, Dialect, ListOptions, Schema, SqlArg, TableInfo};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use std::future::Future;
use tracing::{Instrument, Span, debug, info, warn};

/// Operations shared by every backend.
pub trait Database: Send + Sync {
    fn backend(&self) -> Backend;

    fn dialect(&self) -> Dialect {
        self.backend().dialect()
    }

    fn config(&self) -> &Config;

    /// Acquire a pooled connection and round-trip to the server.
    fn ping(&self, ctx: &Context) -> impl Future<Output = DbResult<()>> + Send;

    /// Close the pool. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Run a statement and buffer its rows.
    fn query(
        &self,
        ctx: &Context,
        sql: &str,
        args: &[SqlArg],
    ) -> impl Future<Output = DbResult<Rows>> + Send;

    /// Run a statement expected to return at most one row. Errors, including
    /// "no rows", surface when the [`Row`] is read.
    fn query_row(&self, ctx: &Context, sql: &str, args: &[SqlArg])
    -> impl Future<Output = Row> + Send;

    fn list_tables(&self, ctx: &Context) -> impl Future<Output = DbResult<Vec<String>>> + Send;

    fn table_exists(&self, ctx: &Context, name: &str) -> impl Future<Output = DbResult<bool>> + Send;

    /// Columns, primary key and foreign keys of one table. `NotFound` when absent.
    fn inspect_table(
        &self,
        ctx: &Context,
        name: &str,
    ) -> impl Future<Output = DbResult<TableInfo>> + Send;

    fn server_version(&self, ctx: &Context) -> impl Future<Output = DbResult<String>> + Send;

    /// Introspect every base table of the configured namespace.
    ///
    /// Either the whole schema is returned or an error; a failure on any
    /// table names that table and keeps its kind.
    fn inspect_schema(&self, ctx: &Context) -> impl Future<Output = DbResult<Schema>> + Send {
        async move {
            let names = self.list_tables(ctx).await?;
            let mut schema = Schema::default();
            for name in names {
                let table = self.inspect_table(ctx, &name).await.map_err(|e| {
                    let e = if e.is_not_found() {
                        DbError::query_failed("table disappeared during introspection")
                    } else {
                        e
                    };
                    e.context(format_args!("inspecting table {name:?}"))
                })?;
                schema.tables.insert(name, table);
            }
            debug!(tables = schema.len(), "Introspected schema");
            Ok(schema)
        }
    }

    /// Build `options` for this backend's dialect, run it and materialize the rows.
    fn list(
        &self,
        ctx: &Context,
        options: &ListOptions,
    ) -> impl Future<Output = DbResult<Vec<Record>>> + Send {
        async move {
            let query = options.build(self.dialect())?;
            let rows = self.query(ctx, &query.sql, &query.args).await?;
            scan_rows(rows)
        }
    }
}

fn facade_span(backend: Backend, config: &Config) -> Span {
    tracing::info_span!("db", backend = %backend, dsn = %config.masked_dsn())
}

fn operation_context(ctx: &Context, config: &Config) -> Context {
    ctx.with_timeout(config.query_timeout())
}

fn check_read_only(backend: Backend, config: &Config, sql: &str) -> DbResult<()> {
    if config.read_only {
        readonly::validate_readonly(sql, backend)
    } else {
        Ok(())
    }
}

/// Ping under the connect timeout; on failure the pool is closed before the
/// error is returned.
async fn establish<D: Database>(ctx: &Context, db: D, span: Span) -> DbResult<D> {
    async move {
        let connect_ctx = ctx.with_timeout(db.config().connect_timeout());
        if let Err(e) = db.ping(&connect_ctx).await {
            warn!(error = %e, "Connection check failed");
            db.close().await;
            return Err(e.context(format_args!("connecting to {}", db.backend().display_name())));
        }
        match db.server_version(&connect_ctx).await {
            Ok(version) => info!(version = %version, "Connected"),
            Err(e) => warn!(error = %e, "Failed to get server version"),
        }
        Ok(db)
    }
    .instrument(span)
    .await
}

// =============================================================================
// PostgreSQL
// =============================================================================

#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
    config: Config,
    span: Span,
}

impl PgDatabase {
    pub async fn connect(ctx: &Context, config: Config) -> DbResult<Self> {
        config.validate()?;
        let pool = pool::postgres(&config)?;
        let db = Self::from_pool(pool, config);
        let span = db.span.clone();
        establish(ctx, db, span).await
    }

    /// Wrap an existing pool without pinging it.
    pub fn from_pool(pool: PgPool, config: Config) -> Self {
        let span = facade_span(Backend::Postgres, &config);
        Self { pool, config, span }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn namespace(&self) -> &str {
        self.config
            .schema
            .as_deref()
            .unwrap_or(schema::DEFAULT_POSTGRES_SCHEMA)
    }
}

impl Database for PgDatabase {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn config(&self) -> &Config {
        &self.config
    }

    async fn ping(&self, ctx: &Context) -> DbResult<()> {
        let ctx = operation_context(ctx, &self.config);
        run_guarded(&ctx, Backend::Postgres, "ping failed", pool::ping(&self.pool))
            .instrument(self.span.clone())
            .await
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!(parent: &self.span, "Pool closed");
        }
    }

    async fn query(&self, ctx: &Context, sql: &str, args: &[SqlArg]) -> DbResult<Rows> {
        check_read_only(Backend::Postgres, &self.config, sql)?;
        let ctx = operation_context(ctx, &self.config);
        executor::postgres::fetch_rows(&ctx, &self.pool, sql, args, self.config.max_rows)
            .instrument(self.span.clone())
            .await
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[SqlArg]) -> Row {
        if let Err(e) = check_read_only(Backend::Postgres, &self.config, sql) {
            return Row::from_error(e);
        }
        let ctx = operation_context(ctx, &self.config);
        executor::postgres::fetch_row(&ctx, &self.pool, sql, args)
            .instrument(self.span.clone())
            .await
    }

    async fn list_tables(&self, ctx: &Context) -> DbResult<Vec<String>> {
        let ctx = operation_context(ctx, &self.config);
        schema::postgres::list_tables(&ctx, &self.pool, self.namespace())
            .instrument(self.span.clone())
            .await
    }

    async fn table_exists(&self, ctx: &Context, name: &str) -> DbResult<bool> {
        let ctx = operation_context(ctx, &self.config);
        schema::postgres::table_exists(&ctx, &self.pool, self.namespace(), name)
            .instrument(self.span.clone())
            .await
    }

    async fn inspect_table(&self, ctx: &Context, name: &str) -> DbResult<TableInfo> {
        let ctx = operation_context(ctx, &self.config);
        schema::postgres::inspect_table(&ctx, &self.pool, self.namespace(), name)
            .instrument(self.span.clone())
            .await
    }

    async fn server_version(&self, ctx: &Context) -> DbResult<String> {
        let ctx = operation_context(ctx, &self.config);
        let fut = sqlx::query_scalar::<_, String>(pool::version_query(Backend::Postgres))
            .fetch_one(&self.pool);
        run_guarded(&ctx, Backend::Postgres, "failed to read server version", fut).await
    }
}

// =============================================================================
// MySQL
// =============================================================================

#[derive(Debug, Clone)]
pub struct MySqlDatabase {
    pool: MySqlPool,
    config: Config,
    span: Span,
}

impl MySqlDatabase {
    pub async fn connect(ctx: &Context, config: Config) -> DbResult<Self> {
        config.validate()?;
        let pool = pool::mysql(&config)?;
        let db = Self::from_pool(pool, config);
        let span = db.span.clone();
        establish(ctx, db, span).await
    }

    /// Wrap an existing pool without pinging it.
    ///
    /// Builder output relies on `ANSI_QUOTES`; pools created elsewhere must
    /// enable it themselves.
    pub fn from_pool(pool: MySqlPool, config: Config) -> Self {
        let span = facade_span(Backend::MySql, &config);
        Self { pool, config, span }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    /// `None` means the connection's current database.
    fn namespace(&self) -> Option<&str> {
        self.config.schema.as_deref()
    }
}

impl Database for MySqlDatabase {
    fn backend(&self) -> Backend {
        Backend::MySql
    }

    fn config(&self) -> &Config {
        &self.config
    }

    async fn ping(&self, ctx: &Context) -> DbResult<()> {
        let ctx = operation_context(ctx, &self.config);
        run_guarded(&ctx, Backend::MySql, "ping failed", pool::ping(&self.pool))
            .instrument(self.span.clone())
            .await
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!(parent: &self.span, "Pool closed");
        }
    }

    async fn query(&self, ctx: &Context, sql: &str, args: &[SqlArg]) -> DbResult<Rows> {
        check_read_only(Backend::MySql, &self.config, sql)?;
        let ctx = operation_context(ctx, &self.config);
        executor::mysql::fetch_rows(&ctx, &self.pool, sql, args, self.config.max_rows)
            .instrument(self.span.clone())
            .await
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[SqlArg]) -> Row {
        if let Err(e) = check_read_only(Backend::MySql, &self.config, sql) {
            return Row::from_error(e);
        }
        let ctx = operation_context(ctx, &self.config);
        executor::mysql::fetch_row(&ctx, &self.pool, sql, args)
            .instrument(self.span.clone())
            .await
    }

    async fn list_tables(&self, ctx: &Context) -> DbResult<Vec<String>> {
        let ctx = operation_context(ctx, &self.config);
        schema::mysql::list_tables(&ctx, &self.pool, self.namespace())
            .instrument(self.span.clone())
            .await
    }

    async fn table_exists(&self, ctx: &Context, name: &str) -> DbResult<bool> {
        let ctx = operation_context(ctx, &self.config);
        schema::mysql::table_exists(&ctx, &self.pool, self.namespace(), name)
            .instrument(self.span.clone())
            .await
    }

    async fn inspect_table(&self, ctx: &Context, name: &str) -> DbResult<TableInfo> {
        let ctx = operation_context(ctx, &self.config);
        schema::mysql::inspect_table(&ctx, &self.pool, self.namespace(), name)
            .instrument(self.span.clone())
            .await
    }

    async fn server_version(&self, ctx: &Context) -> DbResult<String> {
        let ctx = operation_context(ctx, &self.config);
        let fut = sqlx::query_scalar::<_, String>(pool::version_query(Backend::MySql))
            .fetch_one(&self.pool);
        run_guarded(&ctx, Backend::MySql, "failed to read server version", fut).await
    }
}

// =============================================================================
// SQLite
// =============================================================================

#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    pool: SqlitePool,
    config: Config,
    span: Span,
}

impl SqliteDatabase {
    pub async fn connect(ctx: &Context, config: Config) -> DbResult<Self> {
        config.validate()?;
        let pool = pool::sqlite(&config)?;
        let db = Self::from_pool(pool, config);
        let span = db.span.clone();
        establish(ctx, db, span).await
    }

    /// Wrap an existing pool without pinging it.
    pub fn from_pool(pool: SqlitePool, config: Config) -> Self {
        let span = facade_span(Backend::Sqlite, &config);
        Self { pool, config, span }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Database for SqliteDatabase {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn config(&self) -> &Config {
        &self.config
    }

    async fn ping(&self, ctx: &Context) -> DbResult<()> {
        let ctx = operation_context(ctx, &self.config);
        run_guarded(&ctx, Backend::Sqlite, "ping failed", pool::ping(&self.pool))
            .instrument(self.span.clone())
            .await
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!(parent: &self.span, "Pool closed");
        }
    }

    async fn query(&self, ctx: &Context, sql: &str, args: &[SqlArg]) -> DbResult<Rows> {
        check_read_only(Backend::Sqlite, &self.config, sql)?;
        let ctx = operation_context(ctx, &self.config);
        executor::sqlite::fetch_rows(&ctx, &self.pool, sql, args, self.config.max_rows)
            .instrument(self.span.clone())
            .await
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[SqlArg]) -> Row {
        if let Err(e) = check_read_only(Backend::Sqlite, &self.config, sql) {
            return Row::from_error(e);
        }
        let ctx = operation_context(ctx, &self.config);
        executor::sqlite::fetch_row(&ctx, &self.pool, sql, args)
            .instrument(self.span.clone())
            .await
    }

    async fn list_tables(&self, ctx: &Context) -> DbResult<Vec<String>> {
        let ctx = operation_context(ctx, &self.config);
        schema::sqlite::list_tables(&ctx, &self.pool)
            .instrument(self.span.clone())
            .await
    }

    async fn table_exists(&self, ctx: &Context, name: &str) -> DbResult<bool> {
        let ctx = operation_context(ctx, &self.config);
        schema::sqlite::table_exists(&ctx, &self.pool, name)
            .instrument(self.span.clone())
            .await
    }

    async fn inspect_table(&self, ctx: &Context, name: &str) -> DbResult<TableInfo> {
        let ctx = operation_context(ctx, &self.config);
        schema::sqlite::inspect_table(&ctx, &self.pool, name)
            .instrument(self.span.clone())
            .await
    }

    async fn server_version(&self, ctx: &Context) -> DbResult<String> {
        let ctx = operation_context(ctx, &self.config);
        let fut = sqlx::query_scalar::<_, String>(pool::version_query(Backend::Sqlite))
            .fetch_one(&self.pool);
        run_guarded(&ctx, Backend::Sqlite, "failed to read server version", fut).await
    }
}

// =============================================================================
// Runtime selection
// =============================================================================

/// A facade for whichever backend the config names.
#[derive(Debug, Clone)]
pub enum AnyDatabase {
    Postgres(PgDatabase),
    MySql(MySqlDatabase),
    Sqlite(SqliteDatabase),
}

impl AnyDatabase {
    pub async fn connect(ctx: &Context, config: Config) -> DbResult<Self> {
        match config.driver {
            Backend::Postgres => PgDatabase::connect(ctx, config).await.map(Self::Postgres),
            Backend::MySql => MySqlDatabase::connect(ctx, config).await.map(Self::MySql),
            Backend::Sqlite => SqliteDatabase::connect(ctx, config).await.map(Self::Sqlite),
        }
    }
}

impl From<PgDatabase> for AnyDatabase {
    fn from(db: PgDatabase) -> Self {
        Self::Postgres(db)
    }
}

impl From<MySqlDatabase> for AnyDatabase {
    fn from(db: MySqlDatabase) -> Self {
        Self::MySql(db)
    }
}

impl From<SqliteDatabase> for AnyDatabase {
    fn from(db: SqliteDatabase) -> Self {
        Self::Sqlite(db)
    }
}

impl Database for AnyDatabase {
    fn backend(&self) -> Backend {
        dispatch!(self, db => db.backend())
    }

    fn config(&self) -> &Config {
        dispatch!(self, db => db.config())
    }

    async fn ping(&self, ctx: &Context) -> DbResult<()> {
        dispatch!(self, db => db.ping(ctx).await)
    }

    async fn close(&self) {
        dispatch!(self, db => db.close().await)
    }

    async fn query(&self, ctx: &Context, sql: &str, args: &[SqlArg]) -> DbResult<Rows> {
        dispatch!(self, db => db.query(ctx, sql, args).await)
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[SqlArg]) -> Row {
        dispatch!(self, db => db.query_row(ctx, sql, args).await)
    }

    async fn list_tables(&self, ctx: &Context) -> DbResult<Vec<String>> {
        dispatch!(self, db => db.list_tables(ctx).await)
    }

    async fn table_exists(&self, ctx: &Context, name: &str) -> DbResult<bool> {
        dispatch!(self, db => db.table_exists(ctx, name).await)
    }

    async fn inspect_table(&self, ctx: &Context, name: &str) -> DbResult<TableInfo> {
        dispatch!(self, db => db.inspect_table(ctx, name).await)
    }

    async fn server_version(&self, ctx: &Context) -> DbResult<String> {
        dispatch!(self, db => db.server_version(ctx).await)
    }
}

//! Connection pool construction.
//!
//! Pools are created lazily so that building one never blocks; the facade
//! verifies reachability with a ping bounded by the connect timeout.

use crate::config::Config;
use crate::error::{DbError, DbResult, ErrorKind};
use crate::models::Backend;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::pool::PoolOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Connection, Executor, MySqlPool, PgPool, Pool, SqlitePool};
use std::str::FromStr;

/// Makes double quotes delimit identifiers on MySQL sessions, keeping any
/// modes the server already set.
const MYSQL_SESSION_SQL_MODE: &str =
    "SET SESSION sql_mode = CONCAT_WS(',', NULLIF(@@SESSION.sql_mode, ''), 'ANSI_QUOTES')";

fn pool_options<DB: sqlx::Database>(config: &Config) -> PoolOptions<DB> {
    let max_lifetime = (config.max_lifetime_secs > 0).then(|| config.max_lifetime());
    let idle_timeout = (config.max_idle_time_secs > 0).then(|| config.max_idle_time());
    PoolOptions::<DB>::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .max_lifetime(max_lifetime)
        .idle_timeout(idle_timeout)
        .acquire_timeout(config.connect_timeout())
}

fn invalid_dsn(backend: Backend, err: sqlx::Error) -> DbError {
    DbError::wrap(
        ErrorKind::ConnectionFailed,
        format!("invalid {} DSN", backend.display_name()),
        err,
    )
}

pub(crate) fn postgres(config: &Config) -> DbResult<PgPool> {
    let options =
        PgConnectOptions::from_str(&config.dsn).map_err(|e| invalid_dsn(Backend::Postgres, e))?;
    let pool: PgPoolOptions = pool_options(config);
    Ok(pool.connect_lazy_with(options))
}

pub(crate) fn mysql(config: &Config) -> DbResult<MySqlPool> {
    let options = MySqlConnectOptions::from_str(&config.dsn)
        .map_err(|e| invalid_dsn(Backend::MySql, e))?
        .charset("utf8mb4");
    let pool: MySqlPoolOptions = pool_options(config);
    Ok(pool
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute(MYSQL_SESSION_SQL_MODE).await?;
                Ok(())
            })
        })
        .connect_lazy_with(options))
}

pub(crate) fn sqlite(config: &Config) -> DbResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.dsn)
        .map_err(|e| invalid_dsn(Backend::Sqlite, e))?
        .read_only(config.read_only);
    let pool: SqlitePoolOptions = pool_options(config);
    Ok(pool.connect_lazy_with(options))
}

/// Round-trip to the server on a pooled connection.
pub(crate) async fn ping<DB: sqlx::Database>(pool: &Pool<DB>) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    conn.ping().await
}

pub(crate) fn version_query(backend: Backend) -> &'static str {
    match backend {
        Backend::Postgres | Backend::MySql => "SELECT version()",
        Backend::Sqlite => "SELECT sqlite_version()",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_dsn_is_connection_failed() {
        let mut config = Config::new("postgres://localhost/db").unwrap();
        config.dsn = "postgres://user@host:notaport/db".to_string();
        let err = postgres(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
        assert!(err.message().contains("PostgreSQL"));
    }

    #[test]
    fn test_version_queries() {
        assert_eq!(version_query(Backend::Postgres), "SELECT version()");
        assert_eq!(version_query(Backend::Sqlite), "SELECT sqlite_version()");
    }
}

//! Translation of native driver errors into [`ErrorKind`].
//!
//! Classification runs in a fixed order:
//!
//! 1. the request context is done, or the driver reports a timeout → `Timeout`
//! 2. the "no rows" sentinel → `NotFound`
//! 3. a structured database error → the backend's code table
//! 4. decode and column errors → `QueryFailed`; anything else → `ConnectionFailed`
//!
//! The context check comes first because an aborted operation may also
//! surface from the driver as a generic I/O failure.

use crate::context::Context;
use crate::error::{DbError, ErrorKind};
use crate::models::Backend;
use sqlx::error::DatabaseError;
use sqlx::mysql::MySqlDatabaseError;

/// Wrap `err` into a [`DbError`] carrying the classified kind.
pub fn translate(backend: Backend, ctx: &Context, err: sqlx::Error, message: &str) -> DbError {
    let kind = classify(backend, ctx, &err);
    DbError::wrap(kind, message, err)
}

pub fn classify(backend: Backend, ctx: &Context, err: &sqlx::Error) -> ErrorKind {
    if ctx.is_done() {
        return ErrorKind::Timeout;
    }
    match err {
        sqlx::Error::PoolTimedOut => ErrorKind::Timeout,
        sqlx::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
        sqlx::Error::RowNotFound => ErrorKind::NotFound,
        sqlx::Error::Database(db_err) => classify_database_error(backend, db_err.as_ref()),
        sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => ErrorKind::QueryFailed,
        sqlx::Error::Encode(_) => ErrorKind::InvalidInput,
        _ => ErrorKind::ConnectionFailed,
    }
}

fn classify_database_error(backend: Backend, err: &(dyn DatabaseError + 'static)) -> ErrorKind {
    match backend {
        Backend::Postgres => err
            .code()
            .map_or(ErrorKind::QueryFailed, |code| postgres_sqlstate(&code)),
        Backend::MySql => err
            .try_downcast_ref::<MySqlDatabaseError>()
            .map_or(ErrorKind::QueryFailed, |e| mysql_error_number(e.number())),
        Backend::Sqlite => err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map_or(ErrorKind::QueryFailed, sqlite_result_code),
    }
}

/// Classify a Postgres SQLSTATE.
pub fn postgres_sqlstate(code: &str) -> ErrorKind {
    match code {
        // admin_shutdown, crash_shutdown, cannot_connect_now, too_many_connections,
        // invalid_catalog_name
        "57P01" | "57P02" | "57P03" | "53300" | "3D000" => ErrorKind::ConnectionFailed,
        "42501" => ErrorKind::PermissionDenied,
        "57014" => ErrorKind::Timeout,
        // syntax_error, undefined_table, undefined_column, invalid_schema_name,
        // undefined_function
        "42601" | "42P01" | "42703" | "3F000" | "42883" => ErrorKind::QueryFailed,
        _ => match code.get(..2) {
            Some("08") | Some("28") => ErrorKind::ConnectionFailed,
            Some("22") => ErrorKind::InvalidInput,
            _ => ErrorKind::QueryFailed,
        },
    }
}

/// Classify a MySQL server or client error number.
pub fn mysql_error_number(number: u16) -> ErrorKind {
    match number {
        // ER_CON_COUNT_ERROR, ER_ACCESS_DENIED_ERROR, ER_NO_DB_ERROR, ER_BAD_DB_ERROR,
        // ER_TOO_MANY_USER_CONNECTIONS, CR_CONNECTION_ERROR, CR_CONN_HOST_ERROR,
        // CR_UNKNOWN_HOST, CR_SERVER_GONE_ERROR, CR_SERVER_LOST
        1040 | 1045 | 1046 | 1049 | 1203 | 2002 | 2003 | 2005 | 2006 | 2013 => {
            ErrorKind::ConnectionFailed
        }
        // ER_DBACCESS_DENIED_ERROR, ER_TABLEACCESS_DENIED_ERROR,
        // ER_COLUMNACCESS_DENIED_ERROR, ER_SPECIFIC_ACCESS_DENIED_ERROR
        1044 | 1142 | 1143 | 1227 => ErrorKind::PermissionDenied,
        // ER_QUERY_INTERRUPTED, ER_QUERY_TIMEOUT
        1317 | 3024 => ErrorKind::Timeout,
        // ER_WARN_DATA_OUT_OF_RANGE, ER_TRUNCATED_WRONG_VALUE,
        // ER_TRUNCATED_WRONG_VALUE_FOR_FIELD
        1264 | 1292 | 1366 => ErrorKind::InvalidInput,
        // ER_BAD_FIELD_ERROR, ER_PARSE_ERROR, ER_NO_SUCH_TABLE and the rest
        _ => ErrorKind::QueryFailed,
    }
}

/// Classify a SQLite (possibly extended) result code by its primary code.
pub fn sqlite_result_code(code: i32) -> ErrorKind {
    match code & 0xff {
        10 | 11 | 14 | 26 => ErrorKind::ConnectionFailed,
        3 | 8 | 23 => ErrorKind::PermissionDenied,
        5 | 6 | 9 => ErrorKind::Timeout,
        20 | 25 => ErrorKind::InvalidInput,
        _ => ErrorKind::QueryFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_postgres_connection_classes() {
        assert_eq!(postgres_sqlstate("08006"), ErrorKind::ConnectionFailed);
        assert_eq!(postgres_sqlstate("08001"), ErrorKind::ConnectionFailed);
        assert_eq!(postgres_sqlstate("28P01"), ErrorKind::ConnectionFailed);
        assert_eq!(postgres_sqlstate("3D000"), ErrorKind::ConnectionFailed);
        assert_eq!(postgres_sqlstate("53300"), ErrorKind::ConnectionFailed);
        assert_eq!(postgres_sqlstate("57P01"), ErrorKind::ConnectionFailed);
    }

    #[test]
    fn test_postgres_query_codes() {
        assert_eq!(postgres_sqlstate("42601"), ErrorKind::QueryFailed);
        assert_eq!(postgres_sqlstate("42P01"), ErrorKind::QueryFailed);
        assert_eq!(postgres_sqlstate("42703"), ErrorKind::QueryFailed);
        assert_eq!(postgres_sqlstate("23505"), ErrorKind::QueryFailed);
        assert_eq!(postgres_sqlstate("XX000"), ErrorKind::QueryFailed);
    }

    #[test]
    fn test_postgres_other_codes() {
        assert_eq!(postgres_sqlstate("42501"), ErrorKind::PermissionDenied);
        assert_eq!(postgres_sqlstate("57014"), ErrorKind::Timeout);
        assert_eq!(postgres_sqlstate("22P02"), ErrorKind::InvalidInput);
        assert_eq!(postgres_sqlstate("22003"), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_mysql_codes() {
        assert_eq!(mysql_error_number(1045), ErrorKind::ConnectionFailed);
        assert_eq!(mysql_error_number(1049), ErrorKind::ConnectionFailed);
        assert_eq!(mysql_error_number(1040), ErrorKind::ConnectionFailed);
        assert_eq!(mysql_error_number(2013), ErrorKind::ConnectionFailed);
        assert_eq!(mysql_error_number(1044), ErrorKind::PermissionDenied);
        assert_eq!(mysql_error_number(1142), ErrorKind::PermissionDenied);
        assert_eq!(mysql_error_number(3024), ErrorKind::Timeout);
        assert_eq!(mysql_error_number(1366), ErrorKind::InvalidInput);
        assert_eq!(mysql_error_number(1054), ErrorKind::QueryFailed);
        assert_eq!(mysql_error_number(1064), ErrorKind::QueryFailed);
        assert_eq!(mysql_error_number(1146), ErrorKind::QueryFailed);
        assert_eq!(mysql_error_number(9999), ErrorKind::QueryFailed);
    }

    #[test]
    fn test_sqlite_codes() {
        assert_eq!(sqlite_result_code(1), ErrorKind::QueryFailed);
        assert_eq!(sqlite_result_code(14), ErrorKind::ConnectionFailed);
        assert_eq!(sqlite_result_code(26), ErrorKind::ConnectionFailed);
        assert_eq!(sqlite_result_code(8), ErrorKind::PermissionDenied);
        // SQLITE_READONLY_DBMOVED keeps its primary code
        assert_eq!(sqlite_result_code(8 | (4 << 8)), ErrorKind::PermissionDenied);
        assert_eq!(sqlite_result_code(5), ErrorKind::Timeout);
        assert_eq!(sqlite_result_code(20), ErrorKind::InvalidInput);
        assert_eq!(sqlite_result_code(19), ErrorKind::QueryFailed);
    }

    #[test]
    fn test_no_rows_is_not_found() {
        let ctx = Context::background();
        let kind = classify(Backend::Postgres, &ctx, &sqlx::Error::RowNotFound);
        assert_eq!(kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_done_context_wins_over_everything() {
        let ctx = Context::background();
        ctx.cancel();
        for err in [
            sqlx::Error::RowNotFound,
            sqlx::Error::PoolClosed,
            sqlx::Error::Io(std::io::Error::other("broken pipe")),
        ] {
            assert_eq!(classify(Backend::MySql, &ctx, &err), ErrorKind::Timeout);
        }
    }

    #[tokio::test]
    async fn test_expired_deadline_is_timeout() {
        let ctx = Context::background().with_timeout(Duration::ZERO);
        let err = translate(Backend::Sqlite, &ctx, sqlx::Error::PoolClosed, "query failed");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.cause().is_some());
    }

    #[test]
    fn test_driver_timeouts() {
        let ctx = Context::background();
        assert_eq!(
            classify(Backend::Postgres, &ctx, &sqlx::Error::PoolTimedOut),
            ErrorKind::Timeout
        );
        let io = sqlx::Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert_eq!(classify(Backend::Postgres, &ctx, &io), ErrorKind::Timeout);
    }

    #[test]
    fn test_unrecognized_falls_back_to_connection_failed() {
        let ctx = Context::background();
        let refused = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert_eq!(classify(Backend::Postgres, &ctx, &refused), ErrorKind::ConnectionFailed);
        assert_eq!(
            classify(Backend::MySql, &ctx, &sqlx::Error::PoolClosed),
            ErrorKind::ConnectionFailed
        );
        assert_eq!(
            classify(Backend::Sqlite, &ctx, &sqlx::Error::Configuration("bad dsn".into())),
            ErrorKind::ConnectionFailed
        );
    }

    #[test]
    fn test_decode_errors_are_query_failed() {
        let ctx = Context::background();
        assert_eq!(
            classify(Backend::Postgres, &ctx, &sqlx::Error::ColumnNotFound("x".into())),
            ErrorKind::QueryFailed
        );
        assert_eq!(
            classify(
                Backend::Postgres,
                &ctx,
                &sqlx::Error::ColumnIndexOutOfBounds { index: 3, len: 2 }
            ),
            ErrorKind::QueryFailed
        );
    }
}

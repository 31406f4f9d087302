//! Schema introspection.
//!
//! SQL queries are organized in the `queries` submodule with constants for each
//! backend. Backend-specific implementations live in their respective
//! submodules (postgres, mysql, sqlite), each providing the same interface:
//!
//! - `list_tables`: base-table names of the namespace, alphabetically
//! - `table_exists`: presence check that treats absence as `false`
//! - `inspect_table`: columns, primary key and foreign keys of one table;
//!   `NotFound` when the catalog reports no columns
//!
//! Introspection queries are issued by the crate itself and bypass the
//! read-only guard.

use crate::context::Context;
use crate::db::executor::run_guarded;
use crate::error::{DbError, DbResult};
use crate::models::{Backend, ColumnInfo, ForeignKey, TableInfo};
use tracing::debug;

/// Namespace used on Postgres when the config names none.
pub const DEFAULT_POSTGRES_SCHEMA: &str = "public";

fn table_not_found(table: &str) -> DbError {
    DbError::not_found(format!("table {table:?} not found"))
}

fn build_table(table: &str, columns: Vec<ColumnInfo>, primary_key: Vec<String>, foreign_keys: Vec<ForeignKey>) -> TableInfo {
    let mut info = TableInfo::new(table);
    info.columns = columns;
    info.foreign_keys = foreign_keys;
    let info = info.with_primary_key(primary_key);
    debug!(
        table,
        columns = info.columns.len(),
        foreign_keys = info.foreign_keys.len(),
        "Inspected table"
    );
    info
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT DISTINCT table_name::text
            FROM information_schema.tables
            WHERE table_schema = $1
            AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#;

        pub const TABLE_EXISTS: &str = r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = $1
                AND table_name = $2
                AND table_type = 'BASE TABLE'
            )
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            c.column_name::text,
            CASE
                WHEN c.data_type IN ('USER-DEFINED', 'ARRAY') THEN c.udt_name::text
                ELSE c.data_type::text
            END AS data_type,
            c.is_nullable = 'YES' AS nullable,
            c.column_default::text,
            EXISTS (
                SELECT 1
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                    ON kcu.constraint_schema = tc.constraint_schema
                    AND kcu.constraint_name = tc.constraint_name
                    AND kcu.table_name = tc.table_name
                WHERE tc.constraint_type = 'UNIQUE'
                AND tc.table_schema = c.table_schema
                AND tc.table_name = c.table_name
                AND kcu.column_name = c.column_name
                AND (
                    SELECT count(*)
                    FROM information_schema.key_column_usage k
                    WHERE k.constraint_schema = tc.constraint_schema
                    AND k.constraint_name = tc.constraint_name
                ) = 1
            ) AS is_unique
        FROM information_schema.columns c
        WHERE c.table_schema = $1 AND c.table_name = $2
        ORDER BY c.ordinal_position
        "#;

        pub const DESCRIBE_PRIMARY_KEY: &str = r#"
        SELECT kcu.column_name::text
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_schema = tc.constraint_schema
            AND kcu.constraint_name = tc.constraint_name
            AND kcu.table_name = tc.table_name
        WHERE tc.constraint_type = 'PRIMARY KEY'
        AND tc.table_schema = $1
        AND tc.table_name = $2
        ORDER BY kcu.ordinal_position
        "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            a.attname::text AS column_name,
            rc.relname::text AS ref_table,
            ra.attname::text AS ref_column
        FROM pg_constraint con
        JOIN pg_class c ON c.oid = con.conrelid
        JOIN pg_namespace n ON n.oid = c.relnamespace
        JOIN pg_class rc ON rc.oid = con.confrelid
        CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
            WITH ORDINALITY AS k(attnum, ref_attnum, ord)
        JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
        JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.ref_attnum
        WHERE con.contype = 'f'
        AND n.nspname = $1
        AND c.relname = $2
        ORDER BY con.conname, k.ord
        "#;
    }

    pub mod mysql {
        pub const LIST_TABLES: &str = r#"
            SELECT DISTINCT CONVERT(TABLE_NAME USING utf8mb4) AS TABLE_NAME
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
            AND TABLE_TYPE = 'BASE TABLE'
            ORDER BY TABLE_NAME
            "#;

        pub const TABLE_EXISTS: &str = r#"
            SELECT COUNT(*)
            FROM information_schema.TABLES
            WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
            AND TABLE_NAME = ?
            AND TABLE_TYPE = 'BASE TABLE'
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8mb4) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8mb4) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8mb4) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8mb4) AS COLUMN_KEY
        FROM information_schema.COLUMNS
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE()) AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_PRIMARY_KEY: &str = r#"
        SELECT CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND TABLE_NAME = ?
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
        "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
        SELECT
            CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
            CONVERT(REFERENCED_TABLE_NAME USING utf8mb4) AS REFERENCED_TABLE_NAME,
            CONVERT(REFERENCED_COLUMN_NAME USING utf8mb4) AS REFERENCED_COLUMN_NAME
        FROM information_schema.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
        AND TABLE_NAME = ?
        AND REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
        "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT DISTINCT name FROM sqlite_master
            WHERE type = 'table'
            AND name NOT GLOB 'sqlite_*'
            ORDER BY name
            "#;

        pub const TABLE_EXISTS: &str = r#"
            SELECT COUNT(*) FROM sqlite_master
            WHERE type = 'table'
            AND name NOT GLOB 'sqlite_*'
            AND name = ?
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT name, type, "notnull", dflt_value, pk
            FROM pragma_table_info(?)
            ORDER BY cid
            "#;

        pub const UNIQUE_COLUMNS: &str = r#"
            SELECT ii.name
            FROM pragma_index_list(?) AS il
            JOIN pragma_index_info(il.name) AS ii
            WHERE il."unique" = 1
            AND il.origin = 'u'
            AND (SELECT COUNT(*) FROM pragma_index_info(il.name)) = 1
            "#;

        pub const PRIMARY_KEY: &str = r#"
            SELECT name FROM pragma_table_info(?)
            WHERE pk > 0
            ORDER BY pk
            "#;

        pub const DESCRIBE_FOREIGN_KEYS: &str = r#"
            SELECT seq, "table", "from", "to"
            FROM pragma_foreign_key_list(?)
            ORDER BY id, seq
            "#;
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

pub(crate) mod postgres {
    use super::*;
    use sqlx::PgPool;

    const BACKEND: Backend = Backend::Postgres;

    pub async fn list_tables(ctx: &Context, pool: &PgPool, schema: &str) -> DbResult<Vec<String>> {
        let fut = sqlx::query_scalar::<_, String>(queries::postgres::LIST_TABLES)
            .bind(schema)
            .fetch_all(pool);
        let tables = run_guarded(ctx, BACKEND, "failed to list tables", fut).await?;
        debug!(schema, count = tables.len(), "Listed PostgreSQL tables");
        Ok(tables)
    }

    pub async fn table_exists(ctx: &Context, pool: &PgPool, schema: &str, table: &str) -> DbResult<bool> {
        let fut = sqlx::query_scalar::<_, bool>(queries::postgres::TABLE_EXISTS)
            .bind(schema)
            .bind(table)
            .fetch_one(pool);
        run_guarded(ctx, BACKEND, "failed to check table", fut).await
    }

    pub async fn inspect_table(ctx: &Context, pool: &PgPool, schema: &str, table: &str) -> DbResult<TableInfo> {
        let fut = sqlx::query_as::<_, (String, String, bool, Option<String>, bool)>(
            queries::postgres::DESCRIBE_COLUMNS,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool);
        let rows = run_guarded(ctx, BACKEND, "failed to read columns", fut).await?;
        if rows.is_empty() {
            return Err(table_not_found(table));
        }

        let columns = rows
            .into_iter()
            .map(|(name, data_type, nullable, default, unique)| {
                let column = ColumnInfo::new(name, data_type, nullable).with_default(default);
                if unique { column.with_unique() } else { column }
            })
            .collect();

        let fut = sqlx::query_scalar::<_, String>(queries::postgres::DESCRIBE_PRIMARY_KEY)
            .bind(schema)
            .bind(table)
            .fetch_all(pool);
        let primary_key = run_guarded(ctx, BACKEND, "failed to read primary key", fut).await?;

        let fut = sqlx::query_as::<_, (String, String, String)>(queries::postgres::DESCRIBE_FOREIGN_KEYS)
            .bind(schema)
            .bind(table)
            .fetch_all(pool);
        let foreign_keys = run_guarded(ctx, BACKEND, "failed to read foreign keys", fut)
            .await?
            .into_iter()
            .map(|(column, ref_table, ref_column)| ForeignKey::new(column, ref_table, ref_column))
            .collect();

        Ok(build_table(table, columns, primary_key, foreign_keys))
    }
}

pub(crate) mod mysql {
    use super::*;
    use sqlx::MySqlPool;

    const BACKEND: Backend = Backend::MySql;

    pub async fn list_tables(ctx: &Context, pool: &MySqlPool, schema: Option<&str>) -> DbResult<Vec<String>> {
        let fut = sqlx::query_scalar::<_, String>(queries::mysql::LIST_TABLES)
            .bind(schema)
            .fetch_all(pool);
        let tables = run_guarded(ctx, BACKEND, "failed to list tables", fut).await?;
        debug!(schema, count = tables.len(), "Listed MySQL tables");
        Ok(tables)
    }

    pub async fn table_exists(ctx: &Context, pool: &MySqlPool, schema: Option<&str>, table: &str) -> DbResult<bool> {
        let fut = sqlx::query_scalar::<_, i64>(queries::mysql::TABLE_EXISTS)
            .bind(schema)
            .bind(table)
            .fetch_one(pool);
        Ok(run_guarded(ctx, BACKEND, "failed to check table", fut).await? > 0)
    }

    pub async fn inspect_table(
        ctx: &Context,
        pool: &MySqlPool,
        schema: Option<&str>,
        table: &str,
    ) -> DbResult<TableInfo> {
        let fut = sqlx::query_as::<_, (String, String, String, Option<String>, String)>(
            queries::mysql::DESCRIBE_COLUMNS,
        )
        .bind(schema)
        .bind(table)
        .fetch_all(pool);
        let rows = run_guarded(ctx, BACKEND, "failed to read columns", fut).await?;
        if rows.is_empty() {
            return Err(table_not_found(table));
        }

        let fut = sqlx::query_scalar::<_, String>(queries::mysql::DESCRIBE_PRIMARY_KEY)
            .bind(schema)
            .bind(table)
            .fetch_all(pool);
        let primary_key: Vec<String> =
            run_guarded(ctx, BACKEND, "failed to read primary key", fut).await?;

        let columns = rows
            .into_iter()
            .map(|(name, data_type, nullable, default, key)| {
                let unique = is_unique_key(&key, primary_key.contains(&name));
                let column = ColumnInfo::new(name, data_type, nullable.eq_ignore_ascii_case("YES"))
                    .with_default(default);
                if unique { column.with_unique() } else { column }
            })
            .collect();

        let fut = sqlx::query_as::<_, (String, String, String)>(queries::mysql::DESCRIBE_FOREIGN_KEYS)
            .bind(schema)
            .bind(table)
            .fetch_all(pool);
        let foreign_keys = run_guarded(ctx, BACKEND, "failed to read foreign keys", fut)
            .await?
            .into_iter()
            .map(|(column, ref_table, ref_column)| ForeignKey::new(column, ref_table, ref_column))
            .collect();

        Ok(build_table(table, columns, primary_key, foreign_keys))
    }

    /// Classify `COLUMN_KEY`. A table without a primary key reports its first
    /// UNIQUE NOT NULL column as `PRI` even though no `PRIMARY` constraint
    /// exists; that column is unique, not primary.
    pub(crate) fn is_unique_key(column_key: &str, in_primary_key: bool) -> bool {
        column_key.eq_ignore_ascii_case("UNI")
            || (column_key.eq_ignore_ascii_case("PRI") && !in_primary_key)
    }
}

pub(crate) mod sqlite {
    use super::*;
    use sqlx::SqlitePool;
    use std::collections::HashMap;

    const BACKEND: Backend = Backend::Sqlite;

    pub async fn list_tables(ctx: &Context, pool: &SqlitePool) -> DbResult<Vec<String>> {
        let fut = sqlx::query_scalar::<_, String>(queries::sqlite::LIST_TABLES).fetch_all(pool);
        let tables = run_guarded(ctx, BACKEND, "failed to list tables", fut).await?;
        debug!(count = tables.len(), "Listed SQLite tables");
        Ok(tables)
    }

    pub async fn table_exists(ctx: &Context, pool: &SqlitePool, table: &str) -> DbResult<bool> {
        let fut = sqlx::query_scalar::<_, i64>(queries::sqlite::TABLE_EXISTS)
            .bind(table)
            .fetch_one(pool);
        Ok(run_guarded(ctx, BACKEND, "failed to check table", fut).await? > 0)
    }

    async fn fetch_primary_key(ctx: &Context, pool: &SqlitePool, table: &str) -> DbResult<Vec<String>> {
        let fut = sqlx::query_scalar::<_, String>(queries::sqlite::PRIMARY_KEY)
            .bind(table)
            .fetch_all(pool);
        run_guarded(ctx, BACKEND, "failed to read primary key", fut).await
    }

    pub async fn inspect_table(ctx: &Context, pool: &SqlitePool, table: &str) -> DbResult<TableInfo> {
        let fut = sqlx::query_as::<_, (String, String, i64, Option<String>, i64)>(
            queries::sqlite::DESCRIBE_COLUMNS,
        )
        .bind(table)
        .fetch_all(pool);
        let rows = run_guarded(ctx, BACKEND, "failed to read columns", fut).await?;
        if rows.is_empty() {
            return Err(table_not_found(table));
        }

        let fut = sqlx::query_scalar::<_, Option<String>>(queries::sqlite::UNIQUE_COLUMNS)
            .bind(table)
            .fetch_all(pool);
        let unique: Vec<String> = run_guarded(ctx, BACKEND, "failed to read unique constraints", fut)
            .await?
            .into_iter()
            .flatten()
            .collect();

        // pk holds the 1-based position within the primary key
        let mut keyed: Vec<(i64, String)> = rows
            .iter()
            .filter(|(_, _, _, _, pk)| *pk > 0)
            .map(|(name, _, _, _, pk)| (*pk, name.clone()))
            .collect();
        keyed.sort();
        let primary_key = keyed.into_iter().map(|(_, name)| name).collect();

        let columns = rows
            .into_iter()
            .map(|(name, data_type, notnull, default, _)| {
                let is_unique = unique.contains(&name);
                let column = ColumnInfo::new(name, data_type, notnull == 0).with_default(default);
                if is_unique { column.with_unique() } else { column }
            })
            .collect();

        let fut = sqlx::query_as::<_, (i64, String, String, Option<String>)>(
            queries::sqlite::DESCRIBE_FOREIGN_KEYS,
        )
        .bind(table)
        .fetch_all(pool);
        let fk_rows = run_guarded(ctx, BACKEND, "failed to read foreign keys", fut).await?;

        // An omitted referenced column means the referenced table's primary key
        let mut referenced_keys: HashMap<String, Vec<String>> = HashMap::new();
        let mut foreign_keys = Vec::with_capacity(fk_rows.len());
        for (seq, ref_table, column, ref_column) in fk_rows {
            let ref_column = match ref_column {
                Some(c) => c,
                None => {
                    if !referenced_keys.contains_key(&ref_table) {
                        let keys = fetch_primary_key(ctx, pool, &ref_table).await?;
                        referenced_keys.insert(ref_table.clone(), keys);
                    }
                    referenced_keys
                        .get(&ref_table)
                        .and_then(|keys| keys.get(usize::try_from(seq).unwrap_or(usize::MAX)))
                        .cloned()
                        .unwrap_or_else(|| "rowid".to_string())
                }
            };
            foreign_keys.push(ForeignKey::new(column, ref_table, ref_column));
        }

        Ok(build_table(table, columns, primary_key, foreign_keys))
    }
}

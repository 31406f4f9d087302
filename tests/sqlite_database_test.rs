//! Integration tests for the SQLite facade against a real database file.
//!
//! Tests verify that:
//! - Schema introspection reports columns, keys and unique flags
//! - Queries decode every storage class into JSON values
//! - Read-only connections reject writes before they reach the driver
//! - Writable connections accept writes through the same entry point
//! - Cancellation and deadlines surface as `Timeout`

use datri::db::{scan_row, scan_rows, SqliteDatabase};
use datri::models::{Filter, ListOptions, SortDirection, SortField, SqlArg};
use datri::{AnyDatabase, Config, Context, Database, ErrorKind};
use serde_json::json;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::Duration;
use tempfile::NamedTempFile;

const SETUP: &[&str] = &[
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        name TEXT,
        score REAL DEFAULT 0
    )",
    "CREATE TABLE posts (
        id INTEGER PRIMARY KEY,
        author_id INTEGER NOT NULL REFERENCES users(id),
        title TEXT NOT NULL,
        body BLOB
    )",
    "CREATE TABLE post_tags (
        post_id INTEGER NOT NULL REFERENCES posts,
        tag TEXT NOT NULL,
        PRIMARY KEY (tag, post_id)
    )",
    "INSERT INTO users (id, email, name, score) VALUES (1, 'ada@example.com', 'Ada', 9.5)",
    "INSERT INTO users (id, email, name, score) VALUES (2, 'bob@example.com', NULL, 3)",
    "INSERT INTO users (id, email, name, score) VALUES (3, 'cy@example.com', 'Cy', 7.25)",
    "INSERT INTO posts (id, author_id, title, body) VALUES (10, 1, 'Hello', X'00FF10')",
    "INSERT INTO posts (id, author_id, title, body) VALUES (11, 1, 'Notes ✓', NULL)",
];

fn config_for(path: &str, read_only: bool) -> Config {
    let mut config = Config::new(format!("sqlite:{path}")).unwrap();
    config.read_only = read_only;
    config
}

/// Create a populated database file and return its path.
async fn setup_db() -> String {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the file after the handle drops
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let ctx = Context::background();
    let db = SqliteDatabase::connect(&ctx, config_for(&db_path, false))
        .await
        .unwrap();
    for sql in SETUP {
        db.query(&ctx, sql, &[]).await.unwrap();
    }
    db.close().await;
    db_path
}

async fn open_read_only(path: &str) -> AnyDatabase {
    AnyDatabase::connect(&Context::background(), config_for(path, true))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_list_tables_sorted() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let tables = db.list_tables(&ctx).await.unwrap();
    assert_eq!(tables, vec!["post_tags", "posts", "users"]);
    assert!(db.table_exists(&ctx, "posts").await.unwrap());
    assert!(!db.table_exists(&ctx, "missing").await.unwrap());
    db.close().await;
}

#[tokio::test]
async fn test_inspect_table_columns_and_keys() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let users = db.inspect_table(&ctx, "users").await.unwrap();
    assert_eq!(users.name, "users");
    let names: Vec<&str> = users.column_names().collect();
    assert_eq!(names, vec!["id", "email", "name", "score"]);
    assert_eq!(users.primary_key, vec!["id"]);

    let id = users.column("id").unwrap();
    assert!(id.is_primary);
    let email = users.column("email").unwrap();
    assert!(email.is_unique);
    assert!(!email.nullable);
    assert_eq!(email.data_type, "TEXT");
    let name = users.column("name").unwrap();
    assert!(name.nullable);
    assert!(!name.is_unique);
    assert_eq!(users.column("score").unwrap().default.as_deref(), Some("0"));
    assert!(users.foreign_keys.is_empty());

    let posts = db.inspect_table(&ctx, "posts").await.unwrap();
    assert_eq!(posts.foreign_keys.len(), 1);
    assert_eq!(posts.foreign_keys[0].column, "author_id");
    assert_eq!(posts.foreign_keys[0].ref_table, "users");
    assert_eq!(posts.foreign_keys[0].ref_column, "id");
    db.close().await;
}

#[tokio::test]
async fn test_composite_key_and_implicit_reference() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let tags = db.inspect_table(&ctx, "post_tags").await.unwrap();
    // Declaration order of the key, not column order
    assert_eq!(tags.primary_key, vec!["tag", "post_id"]);
    assert!(tags.column("tag").unwrap().is_primary);
    assert!(tags.column("post_id").unwrap().is_primary);

    // REFERENCES posts with no column resolves to the posts primary key
    assert_eq!(tags.foreign_keys.len(), 1);
    assert_eq!(tags.foreign_keys[0].ref_table, "posts");
    assert_eq!(tags.foreign_keys[0].ref_column, "id");
    db.close().await;
}

#[tokio::test]
async fn test_inspect_schema_covers_every_table() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let schema = db.inspect_schema(&ctx).await.unwrap();
    assert_eq!(schema.len(), 3);
    let names: Vec<&str> = schema.table_names().collect();
    assert_eq!(names, vec!["post_tags", "posts", "users"]);

    let mut options = ListOptions::new("users");
    options.filters = vec![Filter::new("nope", "=", 1)];
    let err = schema.check_list_options(&options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    db.close().await;
}

#[tokio::test]
async fn test_inspect_missing_table_is_not_found() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;

    let err = db
        .inspect_table(&Context::background(), "ghosts")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.message().contains("ghosts"));
    db.close().await;
}

#[tokio::test]
async fn test_query_decodes_values() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let rows = db
        .query(
            &ctx,
            "SELECT p.id, p.title, p.body, u.name, u.score
             FROM posts p JOIN users u ON u.id = p.author_id
             ORDER BY p.id",
            &[],
        )
        .await
        .unwrap();
    assert_eq!(rows.columns(), ["id", "title", "body", "name", "score"]);

    let records = scan_rows(rows).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        serde_json::Value::Object(records[0].clone()),
        json!({"id": 10, "title": "Hello", "body": "AP8Q", "name": "Ada", "score": 9.5})
    );
    assert_eq!(records[1]["title"], json!("Notes ✓"));
    assert_eq!(records[1]["body"], json!(null));

    // Column order follows the select list
    let keys: Vec<&String> = records[0].keys().collect();
    assert_eq!(keys, ["id", "title", "body", "name", "score"]);
    db.close().await;
}

#[tokio::test]
async fn test_query_with_arguments() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let rows = db
        .query(
            &ctx,
            "SELECT id, name FROM users WHERE score > ? AND email LIKE ? ORDER BY id",
            &[SqlArg::Float(5.0), SqlArg::from("%@example.com")],
        )
        .await
        .unwrap();
    let records = scan_rows(rows).unwrap();
    let ids: Vec<i64> = records.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 3]);

    let mut rows = db
        .query(&ctx, "SELECT name FROM users WHERE id = ?", &[SqlArg::Int(2)])
        .await
        .unwrap();
    assert!(rows.next_row());
    assert_eq!(rows.get::<Option<String>>(0).unwrap(), None);
    assert!(!rows.next_row());
    rows.close();
    db.close().await;
}

#[tokio::test]
async fn test_empty_result_is_not_an_error() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let rows = db
        .query(&ctx, "SELECT * FROM users WHERE id < 0", &[])
        .await
        .unwrap();
    assert_eq!(rows.columns(), ["id", "email", "name", "score"]);
    assert!(scan_rows(rows).unwrap().is_empty());

    // Column names are reported with bound arguments too
    let mut rows = db
        .query(&ctx, "SELECT id, email FROM users WHERE id = ?", &[SqlArg::Int(-1)])
        .await
        .unwrap();
    assert_eq!(rows.columns(), ["id", "email"]);
    assert!(!rows.next_row());

    let row = db
        .query_row(&ctx, "SELECT id FROM users WHERE id = ?", &[SqlArg::Int(99)])
        .await;
    let err = scan_row(&row, &["id"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    db.close().await;
}

#[tokio::test]
async fn test_query_row_scans_into_struct() {
    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct User {
        id: i64,
        email: String,
        name: Option<String>,
    }

    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let row = db
        .query_row(&ctx, "SELECT id, email, name FROM users WHERE id = ?", &[SqlArg::Int(1)])
        .await;
    let user: User = row.scan().unwrap();
    assert_eq!(
        user,
        User {
            id: 1,
            email: "ada@example.com".into(),
            name: Some("Ada".into()),
        }
    );

    let err = scan_row(&row, &["id"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    db.close().await;
}

#[tokio::test]
async fn test_unknown_table_is_query_failed() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;

    let err = db
        .query(&Context::background(), "SELECT * FROM nowhere", &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueryFailed);
    db.close().await;
}

#[tokio::test]
async fn test_read_only_rejects_writes() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    for sql in [
        "DELETE FROM users",
        "UPDATE users SET name = 'x'",
        "INSERT INTO users (email) VALUES ('z@example.com')",
        "DROP TABLE posts",
        "SELECT 1; DELETE FROM users",
    ] {
        let err = db.query(&ctx, sql, &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied, "{sql}");
    }

    let row = db.query_row(&ctx, "DELETE FROM users WHERE id = 1", &[]).await;
    assert_eq!(row.values().unwrap_err().kind(), ErrorKind::PermissionDenied);

    let rows = db.query(&ctx, "SELECT COUNT(*) AS n FROM users", &[]).await.unwrap();
    assert_eq!(scan_rows(rows).unwrap()[0]["n"], json!(3));
    db.close().await;
}

#[tokio::test]
async fn test_writable_connection_accepts_writes() {
    let path = setup_db().await;
    let ctx = Context::background();
    let db = SqliteDatabase::connect(&ctx, config_for(&path, false))
        .await
        .unwrap();

    db.query(
        &ctx,
        "INSERT INTO users (id, email, name) VALUES (?, ?, ?)",
        &[SqlArg::Int(4), "dee@example.com".into(), SqlArg::Null],
    )
    .await
    .unwrap();

    let row = db
        .query_row(&ctx, "SELECT email FROM users WHERE id = 4", &[])
        .await;
    assert_eq!(row.get::<String>(0).unwrap(), "dee@example.com");
    db.close().await;
}

#[tokio::test]
async fn test_list_applies_filters_and_paging() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let mut options = ListOptions::new("users");
    options.columns = vec!["id".into(), "email".into()];
    options.filters = vec![Filter::new("score", ">=", 3)];
    options.sort = vec![SortField::new("score", SortDirection::Desc)];
    options.limit = Some(2);
    let records = db.list(&ctx, &options).await.unwrap();
    let ids: Vec<i64> = records.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 3]);

    // Offset without a limit still returns the tail
    let mut options = ListOptions::new("users");
    options.sort = vec![SortField::new("id", SortDirection::Asc)];
    options.offset = Some(1);
    let records = db.list(&ctx, &options).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["id"], json!(2));

    // A quote in the value stays data
    let mut options = ListOptions::new("users");
    options.filters = vec![Filter::new("email", "=", "x' OR '1'='1")];
    assert!(db.list(&ctx, &options).await.unwrap().is_empty());
    db.close().await;
}

#[tokio::test]
async fn test_cancelled_context_is_timeout() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;

    let ctx = Context::background();
    ctx.cancel();
    let err = db.query(&ctx, "SELECT * FROM users", &[]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    let err = db.list_tables(&ctx).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let expired = Context::background().with_timeout(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let err = db.ping(&expired).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    db.close().await;
}

#[tokio::test]
async fn test_server_version_and_dialect() {
    let path = setup_db().await;
    let db = open_read_only(&path).await;
    let ctx = Context::background();

    let version = db.server_version(&ctx).await.unwrap();
    assert!(version.starts_with('3'), "{version}");
    assert_eq!(db.backend(), datri::models::Backend::Sqlite);
    assert_eq!(db.dialect(), datri::models::Dialect::Sqlite);
    db.ping(&ctx).await.unwrap();
    db.close().await;
}

#[tokio::test]
async fn test_internal_table_filter_is_exact_prefix() {
    let path = setup_db().await;
    let ctx = Context::background();
    let writer = SqliteDatabase::connect(&ctx, config_for(&path, false))
        .await
        .unwrap();
    for sql in [
        "CREATE TABLE sqliteusers (id INTEGER PRIMARY KEY)",
        "CREATE TABLE SQLite1 (id INTEGER PRIMARY KEY)",
        // AUTOINCREMENT creates the internal sqlite_sequence table
        "CREATE TABLE events (id INTEGER PRIMARY KEY AUTOINCREMENT, kind TEXT)",
        "INSERT INTO events (kind) VALUES ('boot')",
    ] {
        writer.query(&ctx, sql, &[]).await.unwrap();
    }
    writer.close().await;

    let db = open_read_only(&path).await;
    let tables = db.list_tables(&ctx).await.unwrap();
    assert_eq!(
        tables,
        vec!["SQLite1", "events", "post_tags", "posts", "sqliteusers", "users"]
    );
    assert!(db.table_exists(&ctx, "sqliteusers").await.unwrap());
    assert!(db.table_exists(&ctx, "SQLite1").await.unwrap());
    assert!(!db.table_exists(&ctx, "sqlite_sequence").await.unwrap());
    assert!(!db.table_exists(&ctx, "sqlite_master").await.unwrap());

    let schema = db.inspect_schema(&ctx).await.unwrap();
    assert_eq!(schema.len(), 6);
    assert!(schema.table("sqliteusers").is_some());
    db.close().await;
}

#[tokio::test]
async fn test_oversized_timeout_is_rejected_not_panicking() {
    let path = setup_db().await;
    let ctx = Context::background();

    let mut config = config_for(&path, true);
    config.query_timeout_secs = u64::MAX;
    let err = SqliteDatabase::connect(&ctx, config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    // A facade over a caller-built pool skips validation but still runs
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&format!("sqlite:{path}"))
        .await
        .unwrap();
    let mut config = config_for(&path, true);
    config.query_timeout_secs = u64::MAX;
    let db = SqliteDatabase::from_pool(pool, config);
    let rows = db
        .query(&ctx, "SELECT COUNT(*) AS n FROM users", &[])
        .await
        .unwrap();
    assert_eq!(scan_rows(rows).unwrap()[0]["n"], json!(3));
    db.close().await;
}

#[tokio::test]
async fn test_row_cap_defers_error() {
    let path = setup_db().await;
    let ctx = Context::background();
    let mut config = config_for(&path, true);
    config.max_rows = 2;
    let db = SqliteDatabase::connect(&ctx, config).await.unwrap();

    let mut rows = db
        .query(&ctx, "SELECT id FROM users ORDER BY id", &[])
        .await
        .unwrap();
    let mut ids = Vec::new();
    while rows.next_row() {
        ids.push(rows.get::<i64>(0).unwrap());
    }
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(rows.err().unwrap().kind(), ErrorKind::QueryFailed);

    let rows = db
        .query(&ctx, "SELECT id FROM users ORDER BY id", &[])
        .await
        .unwrap();
    assert_eq!(scan_rows(rows).unwrap_err().kind(), ErrorKind::QueryFailed);

    // Exactly at the cap is fine
    let rows = db
        .query(&ctx, "SELECT id FROM users WHERE id <= 2", &[])
        .await
        .unwrap();
    assert_eq!(scan_rows(rows).unwrap().len(), 2);
    db.close().await;
}

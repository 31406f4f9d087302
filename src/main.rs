//! datri command-line entry point.
//!
//! Connects to one database, runs a single subcommand and prints its result
//! as JSON on stdout. Logs go to stderr.

use clap::Parser;
use datri::config::{Cli, Command};
use datri::db::{AnyDatabase, Database};
use datri::models::{Filter, ListOptions, SortField, SqlArg};
use datri::{Context, DbResult, logging};
use serde_json::{Value as JsonValue, json};
use std::process::ExitCode;
use tracing::{error, info};

async fn run(db: &AnyDatabase, ctx: &Context, command: Command) -> DbResult<JsonValue> {
    match command {
        Command::Ping => {
            db.ping(ctx).await?;
            let version = db.server_version(ctx).await?;
            Ok(json!({ "status": "ok", "backend": db.backend(), "version": version }))
        }
        Command::Tables => Ok(json!(db.list_tables(ctx).await?)),
        Command::Schema { table: Some(table) } => Ok(json!(db.inspect_table(ctx, &table).await?)),
        Command::Schema { table: None } => Ok(json!(db.inspect_schema(ctx).await?)),
        Command::List {
            table,
            columns,
            filters,
            sort,
            limit,
            offset,
        } => {
            let options = ListOptions {
                table,
                columns,
                filters: filters
                    .iter()
                    .map(|f| Filter::parse(f))
                    .collect::<DbResult<_>>()?,
                sort: sort
                    .iter()
                    .map(|s| SortField::parse(s))
                    .collect::<DbResult<_>>()?,
                limit,
                offset,
            };
            Ok(json!(db.list(ctx, &options).await?))
        }
        Command::Query { sql, args } => {
            let args: Vec<SqlArg> = args.iter().map(|a| SqlArg::parse_literal(a)).collect();
            let rows = db.query(ctx, &sql, &args).await?;
            Ok(json!(datri::db::scan_rows(rows)?))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init(&cli.log_level, cli.json_logs) {
        eprintln!("failed to initialize logging: {e}");
    }

    let config = match cli.to_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };

    info!(
        backend = %config.driver,
        dsn = %config.masked_dsn(),
        "Starting datri v{}",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = Context::background();
    let db = match AnyDatabase::connect(&ctx, config).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect");
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&db, &ctx, cli.command).await;
    db.close().await;

    match result.and_then(|value| {
        serde_json::to_string_pretty(&value)
            .map_err(|e| datri::DbError::wrap(datri::ErrorKind::Unknown, "failed to encode output", e))
    }) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

//! Database access layer.
//!
//! - Connection facade and runtime backend selection
//! - Pool construction
//! - Query execution and row decoding
//! - Schema introspection
//! - Native error classification
//! - Read-only statement guard

pub mod classify;
#[macro_use]
pub mod macros;
pub mod database;
mod executor;
mod params;
mod pool;
pub mod readonly;
pub mod rows;
pub mod schema;
pub mod types;

pub use classify::translate;
pub use database::{AnyDatabase, Database, MySqlDatabase, PgDatabase, SqliteDatabase};
pub use readonly::validate_readonly;
pub use rows::{Record, Row, Rows, scan_row, scan_rows};

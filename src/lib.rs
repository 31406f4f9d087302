//! datri: a database abstraction core for PostgreSQL, MySQL and SQLite.
//!
//! One connection facade per backend behind the [`Database`] trait, a
//! backend-neutral result and schema model, a parameterized SELECT builder, and
//! a translator that folds every native driver error into a closed
//! [`ErrorKind`](error::ErrorKind) set.

pub mod builder;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;

pub use config::Config;
pub use context::Context;
pub use db::{AnyDatabase, Database, Record, Row, Rows};
pub use error::{DbError, DbResult, ErrorKind};

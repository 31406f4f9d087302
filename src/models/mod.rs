//! Data models for datri.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod schema;

pub use connection::Backend;
pub use query::{
    Dialect, Filter, ListOptions, Operator, Query, SortDirection, SortField, SqlArg,
};
pub use schema::{ColumnInfo, ForeignKey, Schema, TableInfo};

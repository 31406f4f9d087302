//! Dispatch over [`AnyDatabase`](crate::db::AnyDatabase) variants.
//!
//! Expands to a `match` with one arm per backend, binding the concrete facade
//! to the given name. Zero runtime overhead compared to a hand-written match.
//!
//! ```ignore
//! dispatch!(self, db => db.list_tables(ctx).await)
//! ```

macro_rules! dispatch {
    ($db:expr, $inner:ident => $body:expr) => {
        match $db {
            $crate::db::AnyDatabase::Postgres($inner) => $body,
            $crate::db::AnyDatabase::MySql($inner) => $body,
            $crate::db::AnyDatabase::Sqlite($inner) => $body,
        }
    };
}

pub(crate) use dispatch;

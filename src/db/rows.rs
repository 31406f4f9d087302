//! Backend-neutral result sets.
//!
//! [`Rows`] is a forward-only cursor over decoded rows. A failure that the
//! driver reports after some rows were already produced is deferred: the
//! cursor yields the good rows, then stops, and the failure is available
//! from [`Rows::err`].

use crate::error::{DbError, DbResult, ErrorKind};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;

/// One row as an ordered column → value map.
pub type Record = serde_json::Map<String, JsonValue>;

/// A multi-row result.
#[derive(Debug, Default)]
pub struct Rows {
    columns: Vec<String>,
    pending: VecDeque<Vec<JsonValue>>,
    current: Option<Vec<JsonValue>>,
    deferred: Option<DbError>,
    closed: bool,
}

impl Rows {
    pub fn from_parts(
        columns: Vec<String>,
        rows: Vec<Vec<JsonValue>>,
        deferred: Option<DbError>,
    ) -> Self {
        Self {
            columns,
            pending: rows.into(),
            current: None,
            deferred,
            closed: false,
        }
    }

    /// Advance to the next row. Returns `false` when exhausted, closed, or
    /// when iteration stopped on an error.
    pub fn next_row(&mut self) -> bool {
        if self.closed {
            self.current = None;
            return false;
        }
        self.current = self.pending.pop_front();
        self.current.is_some()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values of the current row.
    pub fn values(&self) -> DbResult<&[JsonValue]> {
        self.current
            .as_deref()
            .ok_or_else(|| DbError::new(ErrorKind::QueryFailed, "no current row"))
    }

    /// Deserialize the current row, in column order, into `T`.
    ///
    /// `T` is typically a tuple whose arity matches the column count.
    pub fn scan<T: DeserializeOwned>(&self) -> DbResult<T> {
        scan_values(self.values()?)
    }

    /// Deserialize a single column of the current row.
    pub fn get<T: DeserializeOwned>(&self, idx: usize) -> DbResult<T> {
        get_value(&self.columns, self.values()?, idx)
    }

    /// The current row as a column → value map.
    pub fn record(&self) -> DbResult<Record> {
        Ok(zip_record(&self.columns, self.values()?))
    }

    /// Release the cursor. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
        self.current = None;
    }

    /// The error that ended iteration early, if any.
    pub fn err(&self) -> Option<&DbError> {
        self.deferred.as_ref()
    }

    pub(crate) fn take_err(&mut self) -> Option<DbError> {
        self.deferred.take()
    }

    pub(crate) fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }
}

/// A single-row result. Errors, including "no row", surface on access.
#[derive(Debug)]
pub struct Row {
    inner: Result<Option<(Vec<String>, Vec<JsonValue>)>, DbError>,
}

impl Row {
    pub fn from_parts(columns: Vec<String>, values: Vec<JsonValue>) -> Self {
        Self {
            inner: Ok(Some((columns, values))),
        }
    }

    pub fn empty() -> Self {
        Self { inner: Ok(None) }
    }

    pub fn from_error(err: DbError) -> Self {
        Self { inner: Err(err) }
    }

    fn parts(&self) -> DbResult<(&[String], &[JsonValue])> {
        match &self.inner {
            Ok(Some((columns, values))) => Ok((columns, values)),
            Ok(None) => Err(DbError::not_found("no rows in result set")),
            Err(e) => Err(e.clone()),
        }
    }

    pub fn scan<T: DeserializeOwned>(&self) -> DbResult<T> {
        let (_, values) = self.parts()?;
        scan_values(values)
    }

    pub fn get<T: DeserializeOwned>(&self, idx: usize) -> DbResult<T> {
        let (columns, values) = self.parts()?;
        get_value(columns, values, idx)
    }

    pub fn columns(&self) -> DbResult<&[String]> {
        self.parts().map(|(columns, _)| columns)
    }

    pub fn values(&self) -> DbResult<&[JsonValue]> {
        self.parts().map(|(_, values)| values)
    }

    pub fn record(&self) -> DbResult<Record> {
        let (columns, values) = self.parts()?;
        Ok(zip_record(columns, values))
    }
}

fn scan_values<T: DeserializeOwned>(values: &[JsonValue]) -> DbResult<T> {
    serde_json::from_value(JsonValue::Array(values.to_vec()))
        .map_err(|e| DbError::wrap(ErrorKind::QueryFailed, "failed to scan row", e))
}

fn get_value<T: DeserializeOwned>(columns: &[String], values: &[JsonValue], idx: usize) -> DbResult<T> {
    let value = values.get(idx).ok_or_else(|| {
        DbError::query_failed(format!(
            "column index {idx} out of range for {} columns",
            values.len()
        ))
    })?;
    serde_json::from_value(value.clone()).map_err(|e| {
        let name = columns.get(idx).map(String::as_str).unwrap_or("?");
        DbError::wrap(
            ErrorKind::QueryFailed,
            format!("failed to scan column {name:?}"),
            e,
        )
    })
}

fn zip_record(columns: &[String], values: &[JsonValue]) -> Record {
    columns
        .iter()
        .cloned()
        .zip(values.iter().cloned())
        .collect()
}

/// Drain `rows` into records, closing it afterwards.
///
/// A deferred iteration error fails the whole call. An empty result is an
/// empty vector, not an error.
pub fn scan_rows(mut rows: Rows) -> DbResult<Vec<Record>> {
    let mut out = Vec::new();
    while rows.next_row() {
        out.push(rows.record()?);
    }
    let deferred = rows.take_err();
    rows.close();
    match deferred {
        Some(e) => Err(e),
        None => Ok(out),
    }
}

/// Map a single row onto the given column names.
///
/// No row is `NotFound`; a column count that differs from `columns` is
/// `QueryFailed`.
pub fn scan_row(row: &Row, columns: &[&str]) -> DbResult<Record> {
    let values = row.values()?;
    if values.len() != columns.len() {
        return Err(DbError::query_failed(format!(
            "row has {} columns, expected {}",
            values.len(),
            columns.len()
        )));
    }
    Ok(columns
        .iter()
        .map(|c| c.to_string())
        .zip(values.iter().cloned())
        .collect())
}

//! Schema-related data models.
//!
//! This module defines the backend-neutral shape produced by introspection.

use super::query::ListOptions;
use crate::error::{DbError, DbResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Every base table of the inspected namespace, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Schema {
    pub tables: BTreeMap<String, TableInfo>,
}

impl Schema {
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    /// Table names in alphabetical order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Check that a list request only references known tables and columns.
    pub fn check_list_options(&self, options: &ListOptions) -> DbResult<()> {
        let table = self
            .table(&options.table)
            .ok_or_else(|| DbError::not_found(format!("unknown table {:?}", options.table)))?;

        let referenced = options
            .columns
            .iter()
            .chain(options.filters.iter().map(|f| &f.column))
            .chain(options.sort.iter().map(|s| &s.column));

        for column in referenced {
            if table.column(column).is_none() {
                return Err(DbError::invalid_input(format!(
                    "unknown column {:?} in table {:?}",
                    column, table.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableInfo {
    pub name: String,
    /// Catalog ordinal order
    pub columns: Vec<ColumnInfo>,
    /// Key-ordinal order for composite keys
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Record `columns` as the primary key and flag the matching columns.
    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in columns {
            let name = name.into();
            if self.primary_key.contains(&name) {
                continue;
            }
            if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
                column.is_primary = true;
            }
            self.primary_key.push(name);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnInfo {
    pub name: String,
    /// Backend-native type name, e.g. "integer", "varchar", "TEXT"
    pub data_type: String,
    pub nullable: bool,
    pub is_primary: bool,
    pub is_unique: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            is_primary: false,
            is_unique: false,
            default: None,
        }
    }

    pub fn with_primary_key(mut self) -> Self {
        self.is_primary = true;
        self
    }

    pub fn with_unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }
}

/// A single-column reference to another table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

impl ForeignKey {
    pub fn new(
        column: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
        }
    }
}

//! The row sink seam.
//!
//! The ingestion pipeline only talks to storage through [`RowStore`]. The
//! sqlx-backed [`crate::SqlStore`] is the production implementation; an ERP
//! bridge or a test double can stand in for it.
//!
//! Table and column arguments are raw names; implementations sanitize them.

use async_trait::async_trait;

use crate::error::Result;
use crate::table::TableSpec;

/// One column value of a row. `None` is stored as NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub column: String,
    pub value: Option<String>,
}

impl Field {
    pub fn new(column: impl Into<String>, value: Option<String>) -> Self {
        Self {
            column: column.into(),
            value,
        }
    }

    pub fn text(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(column, Some(value.into()))
    }
}

/// Equality predicate on a key column. Several are ANDed together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMatch<'a> {
    pub column: &'a str,
    pub value: &'a str,
}

impl<'a> KeyMatch<'a> {
    pub fn new(column: &'a str, value: &'a str) -> Self {
        Self { column, value }
    }
}

/// The stored row found by a key lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PriorRecord {
    /// Value of the profile's date column on the matching row.
    pub date: Option<String>,
}

/// Result of [`RowStore::ensure_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    Reconciled { added: Vec<String> },
    Unchanged,
}

/// Storage operations needed to load one file.
#[async_trait]
pub trait RowStore: Send {
    /// Start the file's transaction.
    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Create the table when absent, otherwise add any missing columns.
    async fn ensure_table(&mut self, spec: &TableSpec) -> Result<Provisioned>;

    /// Insert one row, returning the affected row count.
    async fn insert(&mut self, table: &str, fields: &[Field]) -> Result<u64>;

    /// Overwrite `fields` on every row matching `key`.
    async fn update(&mut self, table: &str, key: &[KeyMatch<'_>], fields: &[Field]) -> Result<u64>;

    /// Delete every row matching `key`.
    async fn delete(&mut self, table: &str, key: &[KeyMatch<'_>]) -> Result<u64>;

    /// Point lookup: the first row matching `key`, with its date column.
    async fn find_prior(
        &mut self,
        table: &str,
        key: &[KeyMatch<'_>],
        date_column: Option<&str>,
    ) -> Result<Option<PriorRecord>>;

    /// Number of rows matching `key`.
    async fn count_matching(&mut self, table: &str, key: &[KeyMatch<'_>]) -> Result<i64>;

    /// Values of `columns` on the first row matching `key`.
    async fn fetch_row(
        &mut self,
        table: &str,
        key: &[KeyMatch<'_>],
        columns: &[&str],
    ) -> Result<Option<Vec<Field>>>;
}

//! Table descriptions and DDL generation.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::ident::{same_identifier, sanitize_identifier};

/// Declared storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnType {
    #[default]
    Text,
    /// Indexable string, used for key columns.
    Varchar,
    /// Indexable string with a uniqueness constraint.
    VarcharUnique,
    Decimal,
    Date,
}

/// One sanitized column of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

/// A table to provision: sanitized name plus ordered, de-duplicated columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    name: String,
    columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Build a spec from raw names. Columns whose sanitized name repeats an
    /// earlier one are dropped.
    pub fn new<I, S>(table: &str, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, ColumnType)>,
        S: AsRef<str>,
    {
        let name = sanitize_identifier(table)?;
        let mut specs: Vec<ColumnSpec> = Vec::new();
        for (raw, column_type) in columns {
            let column = sanitize_identifier(raw.as_ref())?;
            if is_reserved_column(&column) {
                warn!(table = %name, column = %column, "Column name collides with a managed column, skipped");
                continue;
            }
            if specs.iter().any(|c| same_identifier(&c.name, &column)) {
                warn!(table = %name, column = %column, "Duplicate column after sanitization, skipped");
                continue;
            }
            specs.push(ColumnSpec {
                name: column,
                column_type,
            });
        }
        Ok(Self {
            name,
            columns: specs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this spec.
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let mut defs = Vec::with_capacity(self.columns.len() + 2);
        defs.push(dialect.identity_column());
        for column in &self.columns {
            defs.push(format!(
                "{} {}",
                dialect.quote(&column.name),
                dialect.column_type(column.column_type)
            ));
        }
        defs.push(dialect.created_at_column());
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            dialect.quote(&self.name),
            defs.join(", ")
        )
    }

    /// `ALTER TABLE ... ADD COLUMN` statement for a column found missing.
    pub fn add_column_sql(&self, dialect: Dialect, column: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            dialect.quote(&self.name),
            dialect.quote(column),
            dialect.reconcile_type()
        )
    }

    /// Columns of this spec absent from `existing`, in spec order.
    pub fn missing_columns<'a>(&'a self, existing: &[String]) -> Vec<&'a ColumnSpec> {
        self.columns
            .iter()
            .filter(|c| !existing.iter().any(|e| same_identifier(e, &c.name)))
            .collect()
    }
}

fn is_reserved_column(name: &str) -> bool {
    same_identifier(name, "id") || same_identifier(name, "created_at")
}

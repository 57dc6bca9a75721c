//! SQL dialect differences between the supported backends.
//!
//! Both variants are always compiled so DDL generation can be tested for
//! either backend; [`Dialect::active`] picks the one matching the compiled
//! connection type.

use crate::ident::quote_ident;
use crate::table::ColumnType;

/// SQL flavour spoken by the active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
}

impl Dialect {
    /// Dialect of the compiled backend. SQLite wins when both features are on.
    #[cfg(feature = "sqlite")]
    pub const fn active() -> Self {
        Dialect::Sqlite
    }

    #[cfg(all(feature = "mysql", not(feature = "sqlite")))]
    pub const fn active() -> Self {
        Dialect::MySql
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::MySql => "mysql",
        }
    }

    fn quote_char(self) -> char {
        match self {
            Dialect::Sqlite => '"',
            Dialect::MySql => '`',
        }
    }

    /// Quote an already sanitized identifier.
    pub fn quote(self, name: &str) -> String {
        quote_ident(name, self.quote_char())
    }

    /// Surrogate identity column, always the first column of a table.
    pub fn identity_column(self) -> String {
        match self {
            Dialect::Sqlite => format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote("id")),
            Dialect::MySql => format!("{} INT NOT NULL AUTO_INCREMENT PRIMARY KEY", self.quote("id")),
        }
    }

    /// Insert timestamp column, always the last column of a created table.
    pub fn created_at_column(self) -> String {
        format!(
            "{} TIMESTAMP DEFAULT CURRENT_TIMESTAMP",
            self.quote("created_at")
        )
    }

    pub fn column_type(self, ty: ColumnType) -> &'static str {
        match ty {
            ColumnType::Text => "TEXT",
            ColumnType::Varchar => "VARCHAR(255)",
            ColumnType::VarcharUnique => "VARCHAR(255) UNIQUE",
            ColumnType::Decimal => "DECIMAL(10,2)",
            ColumnType::Date => "DATE",
        }
    }

    /// Type used for columns added during reconciliation.
    pub fn reconcile_type(self) -> &'static str {
        "TEXT NULL"
    }

    /// Query returning one row when the bound table name exists.
    pub fn table_exists_sql(self) -> &'static str {
        match self {
            Dialect::Sqlite => "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
            Dialect::MySql => {
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?"
            }
        }
    }

    /// Query listing the column names of the bound table, in table order.
    pub fn columns_sql(self) -> &'static str {
        match self {
            Dialect::Sqlite => "SELECT name FROM pragma_table_info(?) ORDER BY cid",
            // information_schema strings decode as binary on MySQL 8 without the cast
            Dialect::MySql => {
                "SELECT CAST(column_name AS CHAR) FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? ORDER BY ordinal_position"
            }
        }
    }

    /// Cast an expression to the backend's text type so it decodes as a string.
    pub fn text_cast(self, expr: &str) -> String {
        match self {
            Dialect::Sqlite => format!("CAST({} AS TEXT)", expr),
            Dialect::MySql => format!("CAST({} AS CHAR)", expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_follows_dialect() {
        assert_eq!(Dialect::Sqlite.quote("ORDER #"), "\"ORDER #\"");
        assert_eq!(Dialect::MySql.quote("ORDER #"), "`ORDER #`");
    }

    #[test]
    fn identity_column_differs_per_backend() {
        assert!(Dialect::Sqlite.identity_column().contains("AUTOINCREMENT"));
        assert!(Dialect::MySql.identity_column().contains("AUTO_INCREMENT"));
    }

    #[test]
    fn text_cast_uses_backend_type() {
        assert_eq!(Dialect::Sqlite.text_cast("x"), "CAST(x AS TEXT)");
        assert_eq!(Dialect::MySql.text_cast("x"), "CAST(x AS CHAR)");
    }
}

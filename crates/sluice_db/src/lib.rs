//! Storage adapter for Sluice.
//!
//! Owns everything that touches the relational store: connection setup with
//! bounded retry, idempotent table provisioning from header lists, column
//! reconciliation, and parameterized row access behind the [`RowStore`]
//! trait.
//!
//! # Usage
//!
//! ```rust,ignore
//! use sluice_db::{ColumnType, DbConfig, RowStore, SqlStore, TableSpec};
//!
//! let mut store = SqlStore::connect(&DbConfig::sqlite("loads.sqlite3")).await?;
//! let spec = TableSpec::new("optlabel", [("BARCODE", ColumnType::Varchar)])?;
//! store.ensure_table(&spec).await?;
//! ```

mod connect;
mod dialect;
mod error;
mod ident;
mod sql_store;
mod store;
mod table;

pub use connect::{
    connect, Backend, DbConfig, DbConnectOptions, DbConnection, DbRow, MySqlParams,
    DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY,
};
pub use dialect::Dialect;
pub use error::{DbError, Result};
pub use ident::{quote_ident, same_identifier, sanitize_identifier, MAX_IDENTIFIER_LEN};
pub use sql_store::SqlStore;
pub use store::{Field, KeyMatch, PriorRecord, Provisioned, RowStore};
pub use table::{ColumnSpec, ColumnType, TableSpec};

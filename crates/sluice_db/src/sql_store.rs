//! sqlx-backed [`RowStore`] owning a single connection.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Connection, Row};
use tracing::{debug_span, info, Instrument, Span};

use crate::connect::{connect, Backend, DbConfig, DbConnection, DbRow};
use crate::dialect::Dialect;
use crate::error::{DbError, Result};
use crate::ident::sanitize_identifier;
use crate::store::{Field, KeyMatch, PriorRecord, Provisioned, RowStore};
use crate::table::TableSpec;

/// One job's storage connection.
///
/// Dropping the store closes the connection; an open transaction is rolled
/// back by the server.
pub struct SqlStore {
    conn: DbConnection,
    dialect: Dialect,
    in_transaction: bool,
}

impl SqlStore {
    /// Connect using the configured retry budget.
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let conn = connect(config).await?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: DbConnection) -> Self {
        Self {
            conn,
            dialect: Dialect::active(),
            in_transaction: false,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Close the connection, rolling back anything uncommitted.
    pub async fn close(mut self) -> Result<()> {
        if self.in_transaction {
            self.rollback().await?;
        }
        self.conn.close().await?;
        Ok(())
    }

    pub async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let table = sanitize_identifier(table)?;
        let sql = self.dialect.table_exists_sql();
        let row = self.fetch_optional(sql, vec![Some(table)]).await?;
        Ok(row.is_some())
    }

    /// Physical column names of `table`, in table order.
    pub async fn columns(&mut self, table: &str) -> Result<Vec<String>> {
        let table = sanitize_identifier(table)?;
        let sql = self.dialect.columns_sql();
        let rows = self.fetch_all(sql, vec![Some(table)]).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0).map_err(DbError::from))
            .collect()
    }

    fn quoted(&self, raw: &str) -> Result<String> {
        Ok(self.dialect.quote(&sanitize_identifier(raw)?))
    }

    fn where_clause(&self, key: &[KeyMatch<'_>]) -> Result<(String, Vec<Option<String>>)> {
        if key.is_empty() {
            return Err(DbError::invalid_state("key lookup needs at least one column"));
        }
        let mut parts = Vec::with_capacity(key.len());
        let mut binds = Vec::with_capacity(key.len());
        for predicate in key {
            parts.push(format!("{} = ?", self.quoted(predicate.column)?));
            binds.push(Some(predicate.value.to_string()));
        }
        Ok((parts.join(" AND "), binds))
    }

    async fn execute(&mut self, sql: &str, binds: Vec<Option<String>>) -> Result<u64> {
        let span = statement_span("db.exec", sql);
        let start = Instant::now();
        let mut query = sqlx::query::<Backend>(sql);
        for value in binds {
            query = query.bind(value);
        }
        let result = query
            .execute(&mut self.conn)
            .instrument(span.clone())
            .await?;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(result.rows_affected())
    }

    async fn fetch_optional(&mut self, sql: &str, binds: Vec<Option<String>>) -> Result<Option<DbRow>> {
        let span = statement_span("db.query", sql);
        let start = Instant::now();
        let mut query = sqlx::query::<Backend>(sql);
        for value in binds {
            query = query.bind(value);
        }
        let row = query
            .fetch_optional(&mut self.conn)
            .instrument(span.clone())
            .await?;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(row)
    }

    async fn fetch_all(&mut self, sql: &str, binds: Vec<Option<String>>) -> Result<Vec<DbRow>> {
        let span = statement_span("db.query", sql);
        let start = Instant::now();
        let mut query = sqlx::query::<Backend>(sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&mut self.conn)
            .instrument(span.clone())
            .await?;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(rows)
    }

    async fn raw(&mut self, sql: &str) -> Result<()> {
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(sql))
            .instrument(statement_span("db.exec_batch", sql))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RowStore for SqlStore {
    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Err(DbError::invalid_state("transaction already open"));
        }
        self.raw("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Err(DbError::invalid_state("commit without an open transaction"));
        }
        self.raw("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;
        self.raw("ROLLBACK").await
    }

    async fn ensure_table(&mut self, spec: &TableSpec) -> Result<Provisioned> {
        let table = spec.name();
        if !self.table_exists(table).await? {
            let sql = spec.create_sql(self.dialect);
            self.execute(&sql, Vec::new())
                .await
                .map_err(|err| DbError::provision(table, err.to_string()))?;
            info!(table, columns = spec.columns().len(), "Created table");
            return Ok(Provisioned::Created);
        }

        let existing = self.columns(table).await?;
        let missing: Vec<String> = spec
            .missing_columns(&existing)
            .into_iter()
            .map(|c| c.name.clone())
            .collect();
        if missing.is_empty() {
            return Ok(Provisioned::Unchanged);
        }

        for column in &missing {
            let sql = spec.add_column_sql(self.dialect, column);
            self.execute(&sql, Vec::new())
                .await
                .map_err(|err| DbError::provision(table, err.to_string()))?;
            info!(table, column = %column, "Added missing column");
        }
        Ok(Provisioned::Reconciled { added: missing })
    }

    async fn insert(&mut self, table: &str, fields: &[Field]) -> Result<u64> {
        if fields.is_empty() {
            return Err(DbError::invalid_state("insert needs at least one column"));
        }
        let mut columns = Vec::with_capacity(fields.len());
        let mut binds = Vec::with_capacity(fields.len());
        for field in fields {
            columns.push(self.quoted(&field.column)?);
            binds.push(field.value.clone());
        }
        let placeholders = vec!["?"; fields.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quoted(table)?,
            columns.join(", "),
            placeholders
        );
        self.execute(&sql, binds).await
    }

    async fn update(&mut self, table: &str, key: &[KeyMatch<'_>], fields: &[Field]) -> Result<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut assignments = Vec::with_capacity(fields.len());
        let mut binds = Vec::with_capacity(fields.len() + key.len());
        for field in fields {
            assignments.push(format!("{} = ?", self.quoted(&field.column)?));
            binds.push(field.value.clone());
        }
        let (predicate, key_binds) = self.where_clause(key)?;
        binds.extend(key_binds);
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.quoted(table)?,
            assignments.join(", "),
            predicate
        );
        self.execute(&sql, binds).await
    }

    async fn delete(&mut self, table: &str, key: &[KeyMatch<'_>]) -> Result<u64> {
        let (predicate, binds) = self.where_clause(key)?;
        let sql = format!("DELETE FROM {} WHERE {}", self.quoted(table)?, predicate);
        self.execute(&sql, binds).await
    }

    async fn find_prior(
        &mut self,
        table: &str,
        key: &[KeyMatch<'_>],
        date_column: Option<&str>,
    ) -> Result<Option<PriorRecord>> {
        let date_expr = match date_column {
            Some(column) => self.dialect.text_cast(&self.quoted(column)?),
            None => self.dialect.text_cast("NULL"),
        };
        let (predicate, binds) = self.where_clause(key)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            date_expr,
            self.quoted(table)?,
            predicate
        );
        let row = self.fetch_optional(&sql, binds).await?;
        match row {
            Some(row) => Ok(Some(PriorRecord {
                date: row.try_get::<Option<String>, _>(0)?,
            })),
            None => Ok(None),
        }
    }

    async fn count_matching(&mut self, table: &str, key: &[KeyMatch<'_>]) -> Result<i64> {
        let (predicate, binds) = self.where_clause(key)?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", self.quoted(table)?, predicate);
        let row = self.fetch_optional(&sql, binds).await?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>(0)?),
            None => Ok(0),
        }
    }

    async fn fetch_row(
        &mut self,
        table: &str,
        key: &[KeyMatch<'_>],
        columns: &[&str],
    ) -> Result<Option<Vec<Field>>> {
        if columns.is_empty() {
            return Ok(None);
        }
        let mut selected = Vec::with_capacity(columns.len());
        for column in columns {
            selected.push(self.dialect.text_cast(&self.quoted(column)?));
        }
        let (predicate, binds) = self.where_clause(key)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            selected.join(", "),
            self.quoted(table)?,
            predicate
        );
        let Some(row) = self.fetch_optional(&sql, binds).await? else {
            return Ok(None);
        };
        let mut fields = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            fields.push(Field::new(*column, row.try_get::<Option<String>, _>(idx)?));
        }
        Ok(Some(fields))
    }
}

fn statement_span(name: &'static str, sql: &str) -> Span {
    match name {
        "db.query" => debug_span!(
            "db.query",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        ),
        "db.exec_batch" => debug_span!(
            "db.exec_batch",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        ),
        _ => debug_span!(
            "db.exec",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        ),
    }
}

fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit: stable, low-cardinality statement identity for spans.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}

//! Connection setup with bounded retry.
//!
//! The backend is selected at compile time via feature flags. Unlike
//! `sqlx::AnyConnection`, concrete connection types keep full type support
//! for bound values and decoded rows.
//!
//! # Feature Priority
//!
//! - `sqlite` feature (default): `SqliteConnection`
//! - `mysql` feature: `MySqlConnection`
//!
//! If both features are enabled, `sqlite` takes priority.

use std::str::FromStr;
use std::time::Duration;

use sqlx::ConnectOptions;
use tracing::{info, warn};

use crate::error::{DbError, Result};

#[cfg(not(any(feature = "sqlite", feature = "mysql")))]
compile_error!("sluice_db needs either the `sqlite` or the `mysql` feature");

/// Database type selected by features.
#[cfg(feature = "sqlite")]
pub type Backend = sqlx::Sqlite;

#[cfg(all(feature = "mysql", not(feature = "sqlite")))]
pub type Backend = sqlx::MySql;

/// Connection type of the active backend.
pub type DbConnection = <Backend as sqlx::Database>::Connection;

/// Row type of the active backend.
pub type DbRow = <Backend as sqlx::Database>::Row;

/// Connect options of the active backend.
pub type DbConnectOptions = <DbConnection as sqlx::Connection>::Options;

/// Default number of connection attempts per job.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// Default pause between connection attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Server parameters for a MySQL-compatible store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Backend connect options
    pub options: DbConnectOptions,
    /// Attempts before a connection failure is reported
    pub connect_attempts: u32,
    /// Fixed pause between attempts
    pub retry_delay: Duration,
}

impl DbConfig {
    fn with_options(options: DbConnectOptions) -> Self {
        Self {
            options,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// SQLite file database, created when missing.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: impl AsRef<std::path::Path>) -> Self {
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};

        // WAL + busy timeout so concurrent jobs on one file wait instead of failing.
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        Self::with_options(options)
    }

    /// Private in-memory SQLite database (one per connection, for testing).
    #[cfg(feature = "sqlite")]
    pub fn sqlite_memory() -> Self {
        let options = sqlx::sqlite::SqliteConnectOptions::new().in_memory(true);
        Self::with_options(options)
    }

    /// MySQL server database.
    #[cfg(all(feature = "mysql", not(feature = "sqlite")))]
    pub fn mysql(params: &MySqlParams) -> Self {
        let options = sqlx::mysql::MySqlConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .database(&params.database)
            .username(&params.user)
            .password(&params.password);
        Self::with_options(options)
    }

    /// Parse a backend URL (`sqlite:...` or `mysql://...`).
    pub fn from_url(url: &str) -> Result<Self> {
        let options = DbConnectOptions::from_str(url)?;
        Ok(Self::with_options(options))
    }

    /// Set the retry budget.
    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }
}

/// Open one connection, retrying with a fixed backoff.
pub async fn connect(config: &DbConfig) -> Result<DbConnection> {
    let attempts = config.connect_attempts.max(1);
    let mut attempt = 1;
    loop {
        match config.options.connect().await {
            Ok(conn) => {
                if attempt > 1 {
                    info!(attempt, "Connected to database after retry");
                }
                return Ok(conn);
            }
            Err(err) if attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    delay_ms = config.retry_delay.as_millis() as u64,
                    error = %err,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(config.retry_delay).await;
                attempt += 1;
            }
            Err(source) => {
                return Err(DbError::Connect { attempts, source });
            }
        }
    }
}

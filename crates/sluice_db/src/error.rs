//! Error types for the storage layer.

use thiserror::Error;

/// Storage operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Storage errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Connection could not be established within the retry budget.
    #[error("Could not connect after {attempts} attempt(s): {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// Table creation or column reconciliation failed.
    #[error("Provisioning failed for table '{table}': {message}")]
    Provision { table: String, message: String },

    /// Identifier rejected before it reached the database.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Invalid transaction state (commit without begin, nested begin).
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl DbError {
    /// Create a provisioning error.
    pub fn provision(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provision {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create an invalid identifier error.
    pub fn invalid_identifier(msg: impl Into<String>) -> Self {
        Self::InvalidIdentifier(msg.into())
    }

    /// Create an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// True when the error came from a connection failure rather than a statement.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::Sqlx(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::Tls(_)
            ),
            _ => false,
        }
    }
}

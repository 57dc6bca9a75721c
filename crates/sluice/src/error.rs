//! Error types for the ingestion core.

use std::io;
use std::path::PathBuf;

use sluice_db::DbError;
use thiserror::Error;

use crate::transfer::TransferState;

/// Configuration errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Storage backend '{0}' not compiled in. Rebuild with the '{0}' feature.")]
    NotCompiled(String),

    #[error("Profile error: {0}")]
    Profile(#[from] RegistryError),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Schema registry errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No schema profile for '{file_name}' (type code '{code}')")]
    UnknownSchema { file_name: String, code: String },

    #[error("Invalid profile '{code}': {message}")]
    InvalidProfile { code: String, message: String },
}

impl RegistryError {
    pub fn invalid_profile(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidProfile {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Errors reading a CSV file into rows.
#[derive(Error, Debug)]
pub enum ReadError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File is not valid UTF-8 at line {line} (byte {offset})")]
    Encoding { line: u64, offset: usize },

    #[error("File has no rows")]
    Empty,

    #[error("Headers do not match profile {profile}: found {found:?}")]
    HeaderMismatch { profile: String, found: Vec<String> },
}

/// Problems with a single row. Logged and skipped unless the profile is atomic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("missing key value for column {0}")]
    MissingKey(String),

    #[error("malformed {kind} value '{value}' in column {column}")]
    Malformed {
        column: String,
        kind: &'static str,
        value: String,
    },
}

/// Failures of one ingestion job.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Schema(#[from] RegistryError),

    #[error("Read error: {0}")]
    Read(#[from] ReadError),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    #[error("Row at line {line}: {source}")]
    Row {
        line: u64,
        #[source]
        source: RowError,
    },

    #[error("Storage error at line {line}: {source}")]
    RowStorage {
        line: u64,
        #[source]
        source: DbError,
    },
}

impl PipelineError {
    /// Connection failures leave the file in place for the next scan.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_connection())
    }
}

/// File relocation errors.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("{op} failed for {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Copy of {source_path} to {destination} failed verification: {reason}")]
    VerifyFailed {
        source_path: PathBuf,
        destination: PathBuf,
        reason: String,
        /// Steps taken before giving up
        states: Vec<TransferState>,
    },

    #[error("No free destination name for {0}")]
    NoFreeName(PathBuf),
}

impl TransferError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Mail transport errors, reported per recipient.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport rejected message: {0}")]
    Rejected(String),
}

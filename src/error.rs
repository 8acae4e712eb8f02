//! Typed errors for the storage and retrieval core.
//!
//! Every [`MemoryError`] carries a stable machine-readable [`code`](MemoryError::code)
//! and maps onto a process exit code: `1` for operational failures, `2` for
//! validation failures (bad input, missing resources, writes through a read-only
//! surface).

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const IO_ERROR: &str = "IO_ERROR";
pub const DB_ERROR: &str = "DB_ERROR";
pub const JSON_ERROR: &str = "JSON_ERROR";
pub const LOCK_TIMEOUT: &str = "LOCK_TIMEOUT";
pub const DB_NOT_FOUND: &str = "DB_NOT_FOUND";
pub const TABLE_NOT_FOUND: &str = "TABLE_NOT_FOUND";
pub const READONLY: &str = "READONLY";
pub const SQL_ERROR: &str = "SQL_ERROR";
pub const UNKNOWN_CONFIG_KEY: &str = "UNKNOWN_CONFIG_KEY";
pub const INVALID_CONFIG: &str = "INVALID_CONFIG";
pub const INVALID_INPUT: &str = "INVALID_INPUT";

/// Exit code for operational or unexpected failures.
pub const EXIT_OPERATIONAL: u8 = 1;
/// Exit code for validation failures.
pub const EXIT_VALIDATION: u8 = 2;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Filesystem failure, with the path and the operation that failed.
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The guard could not be acquired before its deadline. The protected
    /// operation did not run.
    #[error("could not acquire lock {} within {timeout:?}; another operation is in progress", path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("index database not found: {}", path.display())]
    IndexNotFound { path: PathBuf },

    #[error("table not found: {table}")]
    TableNotFound { table: String },

    #[error("only read-only statements are allowed: {sql}")]
    ReadOnly { sql: String },

    #[error("query failed: {message}")]
    Sql { message: String },

    #[error("unknown configuration key: {key}")]
    UnknownConfigKey { key: String },

    #[error("invalid configuration value for {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("{message}")]
    InvalidInput { message: String },
}

impl MemoryError {
    /// Wrap an I/O error with the operation and path it came from.
    pub fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => IO_ERROR,
            Self::Database(_) => DB_ERROR,
            Self::Json(_) => JSON_ERROR,
            Self::LockTimeout { .. } => LOCK_TIMEOUT,
            Self::IndexNotFound { .. } => DB_NOT_FOUND,
            Self::TableNotFound { .. } => TABLE_NOT_FOUND,
            Self::ReadOnly { .. } => READONLY,
            Self::Sql { .. } => SQL_ERROR,
            Self::UnknownConfigKey { .. } => UNKNOWN_CONFIG_KEY,
            Self::InvalidConfig { .. } => INVALID_CONFIG,
            Self::InvalidInput { .. } => INVALID_INPUT,
        }
    }

    /// `true` for bad input, missing resources and rejected writes.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::IndexNotFound { .. }
                | Self::TableNotFound { .. }
                | Self::ReadOnly { .. }
                | Self::Sql { .. }
                | Self::UnknownConfigKey { .. }
                | Self::InvalidConfig { .. }
                | Self::InvalidInput { .. }
        )
    }

    pub fn exit_code(&self) -> u8 {
        if self.is_validation() {
            EXIT_VALIDATION
        } else {
            EXIT_OPERATIONAL
        }
    }
}

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of every failure the engine can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidName,
    AlreadyExists,
    NotFound,
    ApplyFailure,
    RollbackFailure,
    StoreFailure,
    Timeout,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidName => "invalid name",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::NotFound => "not found",
            ErrorKind::ApplyFailure => "apply failure",
            ErrorKind::RollbackFailure => "rollback failure",
            ErrorKind::StoreFailure => "store failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "configuration",
        };
        f.write_str(s)
    }
}

/// Error type for all strata operations.
///
/// Store-level variants carry an `op` tag naming the phase that produced them
/// (e.g. "create migrations table"), so a terminal error always says where it
/// came from.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Invalid migration name: {0}")]
    InvalidName(String),

    #[error("Migration already exists: {0}")]
    AlreadyExists(String),

    #[error("Migration not found: {0}")]
    NotFound(String),

    #[error("run migration '{name}' failed after {attempts} attempt(s): {source}")]
    ApplyFailure {
        name: String,
        attempts: u32,
        source: Box<MigrationError>,
    },

    #[error("rollback migration '{name}' failed after {attempts} attempt(s): {source}")]
    RollbackFailure {
        name: String,
        attempts: u32,
        source: Box<MigrationError>,
    },

    #[error("rollback migration '{0}': migration is not reversible")]
    Irreversible(String),

    #[error("{op}: {source}")]
    Sql {
        op: &'static str,
        source: sqlx::Error,
    },

    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        source: std::io::Error,
    },

    #[error("{op}: {message}")]
    Store { op: &'static str, message: String },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Raised by a migration unit's own logic.
    #[error("{0}")]
    Unit(String),
}

impl MigrationError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::InvalidName(_) => ErrorKind::InvalidName,
            MigrationError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            MigrationError::NotFound(_) => ErrorKind::NotFound,
            MigrationError::ApplyFailure { .. } | MigrationError::Unit(_) => {
                ErrorKind::ApplyFailure
            }
            MigrationError::RollbackFailure { .. } | MigrationError::Irreversible(_) => {
                ErrorKind::RollbackFailure
            }
            MigrationError::Sql { .. } | MigrationError::Io { .. } | MigrationError::Store { .. } => {
                ErrorKind::StoreFailure
            }
            MigrationError::Timeout { .. } => ErrorKind::Timeout,
            MigrationError::Config(_) => ErrorKind::Config,
        }
    }

    /// Adapter for `map_err` that tags a sqlx error with an operation.
    pub fn sql(op: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| MigrationError::Sql { op, source }
    }

    /// Adapter for `map_err` that tags an I/O error with an operation.
    pub fn io(op: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| MigrationError::Io { op, source }
    }

    pub fn store(op: &'static str, message: impl Into<String>) -> Self {
        MigrationError::Store {
            op,
            message: message.into(),
        }
    }

    pub fn unit(message: impl Into<String>) -> Self {
        MigrationError::Unit(message.into())
    }
}

/// Result type alias using MigrationError.
pub type Result<T> = std::result::Result<T, MigrationError>;

//! Error types for the persistence layer.
//!
//! Errors are organised as a hierarchy under [`StoreError`]: configuration
//! problems, backend/driver failures, backend selection failures and
//! migration failures. Benign conditions (schema conflicts during migration,
//! duplicate seed rows, checksum drift) are not errors; they are reported
//! through the outcome types of the respective components.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::probe::ProbeReport;

/// The primary error type for all persistence operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Configuration errors (fatal at startup)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Backend and driver errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Backend selection errors
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Migration errors
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Query façade usage errors
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl StoreError {
    /// Returns true if the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(e) if e.is_retryable())
    }
}

/// A required connection parameter is missing or invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {key}")]
    Missing { key: String },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("no backend descriptor is configured")]
    NoDescriptors,
}

/// Classification of a driver error, assigned by the adapter that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    /// The target object already exists (duplicate table, column, index, constraint).
    AlreadyExists,
    /// A unique or primary key constraint was violated.
    UniqueViolation,
    /// The referenced table does not exist.
    UndefinedTable,
    /// The database or a row is locked by another session.
    Busy,
    /// Anything else.
    Other,
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbErrorKind::AlreadyExists => write!(f, "already-exists"),
            DbErrorKind::UniqueViolation => write!(f, "unique-violation"),
            DbErrorKind::UndefinedTable => write!(f, "undefined-table"),
            DbErrorKind::Busy => write!(f, "busy"),
            DbErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Errors originating from a database backend or the connection pool.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connecting to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// No pooled connection became available in time, or the wait queue is full.
    #[error("connection pool exhausted for {backend_name} after {waited_ms}ms")]
    PoolExhausted {
        backend_name: String,
        waited_ms: u64,
    },

    /// The pool has been closed.
    #[error("connection pool for {backend_name} is closed")]
    PoolClosed { backend_name: String },

    /// Statement execution failed.
    #[error("query failed ({kind}): {message}")]
    Query { kind: DbErrorKind, message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl BackendError {
    /// Builds a query error of the given kind.
    pub fn query(kind: DbErrorKind, message: impl Into<String>) -> Self {
        BackendError::Query {
            kind,
            message: message.into(),
        }
    }

    /// Returns the driver classification if this is a query error.
    pub fn db_kind(&self) -> Option<DbErrorKind> {
        match self {
            BackendError::Query { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true for transient conditions the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::PoolExhausted { .. })
    }
}

/// Errors raised while resolving the active backend.
#[derive(Error, Debug)]
pub enum SelectionError {
    /// Every configured descriptor probed unhealthy.
    #[error("no backend available ({})", summarize_attempts(.attempts))]
    NoBackendAvailable { attempts: Vec<ProbeReport> },
}

fn summarize_attempts(attempts: &[ProbeReport]) -> String {
    if attempts.is_empty() {
        return "no descriptors probed".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.descriptor, a.outcome))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by the migration runner.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A script failed with a non-benign error. No ledger row was written for it.
    #[error("migration {version} ({name}) failed: {message}")]
    Failed {
        version: u64,
        name: String,
        message: String,
        #[source]
        source: Option<BackendError>,
    },

    /// Two scripts share a version.
    #[error("duplicate migration version {version}")]
    DuplicateVersion { version: u64 },

    /// A script file name does not carry a numeric version prefix.
    #[error("invalid migration script name: {name}")]
    InvalidScriptName { name: String },

    /// Reading scripts from disk failed.
    #[error("failed to read migration scripts from {path}: {message}")]
    Source { path: String, message: String },

    /// The migration lock could not be acquired in time.
    #[error("timed out after {timeout_ms}ms waiting for the migration lock")]
    LockTimeout { timeout_ms: u64 },

    /// The ledger table could not be read or written.
    #[error("migration ledger error: {message}")]
    Ledger { message: String },
}

/// Errors caused by invalid façade arguments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown column {column} on table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("value for {table}.{column} has the wrong type: expected {expected}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
    },

    #[error("update on {table} has no columns to set")]
    EmptyUpdate { table: String },

    #[error("invalid identifier: {ident}")]
    InvalidIdentifier { ident: String },

    #[error("column {column} on table {table} cannot be written")]
    ImmutableColumn { table: String, column: String },

    #[error("table {table} has no soft-delete column")]
    SoftDeleteUnsupported { table: String },

    #[error("inserted row in {table} could not be read back")]
    MissingInsertedRow { table: String },
}

/// Result type alias for persistence operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        crate::backends::sqlite::classify(err)
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        crate::backends::postgres::classify(err)
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

//! Backend abstraction for database drivers.
//!
//! Every backend is reached through one capability interface: a
//! [`BackendAdapter`] opens [`Connection`]s and exposes the [`Dialect`] used to
//! translate backend-agnostic operations into SQL. The selector picks one
//! adapter at startup; nothing else in the crate branches on which backend is
//! active.

use std::fmt::{self, Debug};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::value::{Record, Value};
use crate::error::BackendResult;

/// Identifies the SQL dialect of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// SQLite (embedded, file-based).
    Sqlite,
    /// PostgreSQL (managed or local server).
    Postgres,
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::Sqlite => write!(f, "sqlite"),
            DialectKind::Postgres => write!(f, "postgres"),
        }
    }
}

impl DialectKind {
    /// Parses a dialect name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(DialectKind::Sqlite),
            "postgres" | "postgresql" => Some(DialectKind::Postgres),
            _ => None,
        }
    }
}

/// SQL for a backend-native advisory lock.
///
/// `try_lock` must return a single row with a single boolean column that is
/// true when the lock was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvisoryLockSql {
    /// Non-blocking acquisition.
    pub try_lock: String,
    /// Release.
    pub unlock: String,
}

/// Dialect-specific SQL translation.
pub trait Dialect: Send + Sync + Debug {
    /// Which dialect this is.
    fn kind(&self) -> DialectKind;

    /// Quotes an identifier.
    fn quote_ident(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    /// Positional placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Native representation of a boolean parameter.
    fn encode_bool(&self, value: bool) -> Value;

    /// Clause appended to an INSERT to return the generated id, if supported.
    fn returning_clause(&self, id_column: &str) -> Option<String>;

    /// Query returning the id generated by the last INSERT on this connection,
    /// for dialects without a RETURNING clause.
    fn last_insert_id_query(&self) -> Option<&'static str>;

    /// Query returning one row when the table named by parameter 1 exists.
    fn table_exists_query(&self) -> String;

    /// DDL creating the migration ledger if absent.
    fn ledger_ddl(&self, table: &str) -> String;

    /// DDL creating the single-row migration lock table if absent.
    fn lock_table_ddl(&self, table: &str) -> String;

    /// Native advisory lock, when the backend has one.
    fn advisory_lock(&self, key: i64) -> Option<AdvisoryLockSql>;

    /// Whether DDL can run inside a transaction and be rolled back.
    fn supports_transactional_ddl(&self) -> bool;

    /// Collation applied to text sort keys. Text must order byte-wise on
    /// every backend; `None` when that is already the default.
    fn text_collation(&self) -> Option<&'static str> {
        None
    }
}

/// A live connection to a backend.
///
/// Dropping a connection closes it.
#[async_trait]
pub trait Connection: Send + Debug {
    /// Trivial round trip used for liveness checks.
    async fn ping(&mut self) -> BackendResult<()>;

    /// Executes one or more statements without parameters.
    async fn execute_batch(&mut self, sql: &str) -> BackendResult<()>;

    /// Executes one statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> BackendResult<u64>;

    /// Runs one query and returns all rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> BackendResult<Vec<Record>>;

    /// Returns true when the connection is known to be unusable.
    fn is_broken(&self) -> bool {
        false
    }

    /// Opens a transaction.
    async fn begin(&mut self) -> BackendResult<()> {
        self.execute_batch("BEGIN").await
    }

    /// Commits the open transaction.
    async fn commit(&mut self) -> BackendResult<()> {
        self.execute_batch("COMMIT").await
    }

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> BackendResult<()> {
        self.execute_batch("ROLLBACK").await
    }
}

/// Opens connections to one backend.
#[async_trait]
pub trait BackendAdapter: Send + Sync + Debug {
    /// Returns a human-readable name for this backend.
    fn name(&self) -> &str;

    /// Returns the dialect spoken by this backend.
    fn dialect(&self) -> Arc<dyn Dialect>;

    /// Opens a fresh connection.
    async fn connect(&self) -> BackendResult<Box<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_kind_display() {
        assert_eq!(DialectKind::Sqlite.to_string(), "sqlite");
        assert_eq!(DialectKind::Postgres.to_string(), "postgres");
    }

    #[test]
    fn test_dialect_kind_parse() {
        assert_eq!(DialectKind::parse("PostgreSQL"), Some(DialectKind::Postgres));
        assert_eq!(DialectKind::parse("sqlite"), Some(DialectKind::Sqlite));
        assert_eq!(DialectKind::parse("oracle"), None);
    }
}

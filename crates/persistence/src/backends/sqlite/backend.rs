//! SQLite adapter and connection.

use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{ErrorCode, OpenFlags, ffi, params_from_iter};
use serde::{Deserialize, Serialize};

use super::dialect::SqliteDialect;
use crate::core::{BackendAdapter, Connection, Dialect, Record, Value};
use crate::error::{BackendError, BackendResult, DbErrorKind};

const BACKEND_NAME: &str = "sqlite";

/// Configuration for SQLite connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,

    /// Create the database file when it does not exist.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
            create_if_missing: true,
        }
    }
}

/// Opens connections to one SQLite database file.
#[derive(Debug)]
pub struct SqliteAdapter {
    path: PathBuf,
    config: SqliteConfig,
    dialect: Arc<SqliteDialect>,
}

impl SqliteAdapter {
    /// Creates an adapter for the database at `path`. Nothing is opened yet.
    pub fn open<P: AsRef<Path>>(path: P, config: SqliteConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            dialect: Arc::new(SqliteDialect),
        }
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the connection configuration.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn open_connection(&self) -> BackendResult<rusqlite::Connection> {
        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.config.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let conn = rusqlite::Connection::open_with_flags(&self.path, flags).map_err(|e| {
            BackendError::ConnectionFailed {
                backend_name: BACKEND_NAME.to_string(),
                message: format!("{}: {}", self.path.display(), e),
            }
        })?;

        self.configure(&conn).map_err(|e| BackendError::ConnectionFailed {
            backend_name: BACKEND_NAME.to_string(),
            message: format!("failed to configure {}: {}", self.path.display(), e),
        })?;

        Ok(conn)
    }

    fn configure(&self, conn: &rusqlite::Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))?;

        if self.config.enable_foreign_keys {
            conn.pragma_update(None, "foreign_keys", true)?;
        }

        if self.config.enable_wal {
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        }

        Ok(())
    }
}

#[async_trait]
impl BackendAdapter for SqliteAdapter {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        self.dialect.clone()
    }

    async fn connect(&self) -> BackendResult<Box<dyn Connection>> {
        let conn = self.open_connection()?;
        tracing::debug!(path = %self.path.display(), "Opened SQLite connection");
        Ok(Box::new(SqliteConnection { conn }))
    }
}

/// Connection wrapper for SQLite.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .finish()
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn ping(&mut self) -> BackendResult<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    async fn execute_batch(&mut self, sql: &str) -> BackendResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> BackendResult<u64> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_sql_value)))?;
        Ok(affected as u64)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> BackendResult<Vec<Record>> {
        query_rows(&self.conn, sql, params)
    }
}

fn query_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[Value],
) -> BackendResult<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(params.iter().map(to_sql_value)))?;

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (idx, name) in columns.iter().enumerate() {
            record.insert(name.clone(), from_value_ref(row.get_ref(idx)?));
        }
        records.push(record);
    }
    Ok(records)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Real(r) => SqlValue::Real(*r),
        Value::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(hex::encode(b)),
    }
}

/// Maps a rusqlite error onto the backend error taxonomy.
pub(crate) fn classify(err: rusqlite::Error) -> BackendError {
    let message = err.to_string();
    let kind = match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            {
                DbErrorKind::UniqueViolation
            } else {
                DbErrorKind::Other
            }
        }
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            DbErrorKind::Busy
        }
        _ => classify_message(&message),
    };
    BackendError::query(kind, message)
}

fn classify_message(message: &str) -> DbErrorKind {
    let message = message.to_ascii_lowercase();
    if message.contains("already exists") || message.contains("duplicate column name") {
        DbErrorKind::AlreadyExists
    } else if message.contains("no such table") {
        DbErrorKind::UndefinedTable
    } else {
        DbErrorKind::Other
    }
}

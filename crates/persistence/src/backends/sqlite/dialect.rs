//! SQLite SQL dialect.

use crate::core::{AdvisoryLockSql, Dialect, DialectKind, Value};

/// SQL translation for SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn encode_bool(&self, value: bool) -> Value {
        Value::Integer(i64::from(value))
    }

    fn returning_clause(&self, _id_column: &str) -> Option<String> {
        None
    }

    fn last_insert_id_query(&self) -> Option<&'static str> {
        Some("SELECT last_insert_rowid() AS id")
    }

    fn table_exists_query(&self) -> String {
        "SELECT 1 AS present FROM sqlite_master WHERE type = 'table' AND name = ?1".to_string()
    }

    fn ledger_ddl(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY NOT NULL,
                checksum TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
            self.quote_ident(table)
        )
    }

    fn lock_table_ddl(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY NOT NULL CHECK (id = 1),
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL
            )",
            self.quote_ident(table)
        )
    }

    fn advisory_lock(&self, _key: i64) -> Option<AdvisoryLockSql> {
        None
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }
}

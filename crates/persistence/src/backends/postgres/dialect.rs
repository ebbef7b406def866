//! PostgreSQL SQL dialect.

use crate::core::{AdvisoryLockSql, Dialect, DialectKind, Value};

/// SQL translation for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn encode_bool(&self, value: bool) -> Value {
        Value::Bool(value)
    }

    fn returning_clause(&self, id_column: &str) -> Option<String> {
        Some(format!(" RETURNING {}", self.quote_ident(id_column)))
    }

    fn last_insert_id_query(&self) -> Option<&'static str> {
        None
    }

    fn table_exists_query(&self) -> String {
        "SELECT 1 AS present FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1"
            .to_string()
    }

    fn ledger_ddl(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                version BIGINT PRIMARY KEY NOT NULL,
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

    fn text_collation(&self) -> Option<&'static str> {
        Some("\"C\"")
    }

    fn advisory_lock(&self, key: i64) -> Option<AdvisoryLockSql> {
        Some(AdvisoryLockSql {
            try_lock: format!("SELECT pg_try_advisory_lock({}) AS locked", key),
            unlock: format!("SELECT pg_advisory_unlock({}) AS unlocked", key),
        })
    }

    fn supports_transactional_ddl(&self) -> bool {
        true
    }
}

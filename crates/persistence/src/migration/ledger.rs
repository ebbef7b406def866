//! The `schema_migrations` ledger table.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::MigrationScript;
use crate::core::{Connection, Dialect, Record, Value};
use crate::error::{BackendError, BackendResult, MigrationError};

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    /// Applied version.
    pub version: u64,
    /// Checksum of the body that was applied.
    pub checksum: String,
    /// RFC 3339 timestamp of application.
    pub applied_at: String,
}

fn ledger_error(err: BackendError) -> MigrationError {
    MigrationError::Ledger {
        message: err.to_string(),
    }
}

pub(crate) async fn exists(conn: &mut dyn Connection, dialect: &dyn Dialect) -> Result<bool, MigrationError> {
    let rows = conn
        .query(&dialect.table_exists_query(), &[Value::from(LEDGER_TABLE)])
        .await
        .map_err(ledger_error)?;
    Ok(!rows.is_empty())
}

pub(crate) async fn ensure(conn: &mut dyn Connection, dialect: &dyn Dialect) -> Result<(), MigrationError> {
    conn.execute_batch(&dialect.ledger_ddl(LEDGER_TABLE))
        .await
        .map_err(ledger_error)
}

pub(crate) async fn load(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
) -> Result<Vec<LedgerEntry>, MigrationError> {
    let sql = format!(
        "SELECT version, checksum, applied_at FROM {} ORDER BY version",
        dialect.quote_ident(LEDGER_TABLE)
    );
    let rows = conn.query(&sql, &[]).await.map_err(ledger_error)?;
    rows.iter().map(decode_entry).collect()
}

/// Writes the ledger row for `script`. Runs inside the caller's transaction.
pub(crate) async fn record(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    script: &MigrationScript,
) -> BackendResult<()> {
    let sql = format!(
        "INSERT INTO {} (version, checksum, applied_at) VALUES ({}, {}, {})",
        dialect.quote_ident(LEDGER_TABLE),
        dialect.placeholder(1),
        dialect.placeholder(2),
        dialect.placeholder(3),
    );
    let version = i64::try_from(script.version).map_err(|_| {
        BackendError::query(
            crate::error::DbErrorKind::Other,
            format!("migration version {} does not fit the ledger", script.version),
        )
    })?;
    conn.execute(
        &sql,
        &[
            Value::Integer(version),
            Value::from(script.checksum()),
            Value::Text(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        ],
    )
    .await?;
    Ok(())
}

fn decode_entry(row: &Record) -> Result<LedgerEntry, MigrationError> {
    let malformed = |column: &str| MigrationError::Ledger {
        message: format!("malformed ledger row: bad {}", column),
    };
    let version = row
        .get("version")
        .and_then(Value::as_i64)
        .and_then(|v| u64::try_from(v).ok())
        .ok_or_else(|| malformed("version"))?;
    let checksum = row
        .get("checksum")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("checksum"))?;
    let applied_at = row
        .get("applied_at")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(LedgerEntry {
        version,
        checksum: checksum.to_string(),
        applied_at: applied_at.to_string(),
    })
}

//! Post-migration schema verification.
//!
//! Reports which expected tables exist. Never creates or alters anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::catalog;
use crate::core::Value;
use crate::error::StoreResult;
use crate::selector::BackendHandle;

/// A table the application requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaExpectation {
    /// Table name.
    pub table: String,
}

impl SchemaExpectation {
    /// Expects `table` to exist.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// The tables created by the embedded migrations.
    pub fn application_tables() -> Vec<Self> {
        catalog::all()
            .iter()
            .map(|t| Self::table(t.name()))
            .collect()
    }
}

/// Presence of one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TableStatus {
    /// The table exists.
    Ok,
    /// The table does not exist.
    Missing,
}

/// Per-table verification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    /// Backend inspected.
    pub backend: String,
    /// Status by table name.
    pub tables: BTreeMap<String, TableStatus>,
}

impl SchemaReport {
    /// True when every expected table exists.
    pub fn all_ok(&self) -> bool {
        self.tables.values().all(|s| *s == TableStatus::Ok)
    }

    /// Names of missing tables.
    pub fn missing(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|(_, s)| **s == TableStatus::Missing)
            .map(|(t, _)| t.as_str())
            .collect()
    }
}

/// Checks table existence on the active backend.
#[derive(Debug, Clone)]
pub struct SchemaVerifier {
    handle: Arc<BackendHandle>,
}

impl SchemaVerifier {
    /// Creates a verifier for the active backend.
    pub fn new(handle: Arc<BackendHandle>) -> Self {
        Self { handle }
    }

    /// Probes each expected table once.
    pub async fn verify(&self, expectations: &[SchemaExpectation]) -> StoreResult<SchemaReport> {
        let query = self.handle.dialect().table_exists_query();
        let mut conn = self.handle.acquire().await?;

        let mut tables = BTreeMap::new();
        for expectation in expectations {
            let rows = conn
                .query(&query, &[Value::from(expectation.table.as_str())])
                .await?;
            let status = if rows.is_empty() {
                tracing::warn!(table = %expectation.table, "Expected table is missing");
                TableStatus::Missing
            } else {
                TableStatus::Ok
            };
            tables.insert(expectation.table.clone(), status);
        }

        let report = SchemaReport {
            backend: self.handle.descriptor().name(),
            tables,
        };
        tracing::info!(
            backend = %report.backend,
            checked = report.tables.len(),
            missing = report.missing().len(),
            "Schema verification finished"
        );
        Ok(report)
    }
}

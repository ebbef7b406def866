//! Idempotent reference-data seeding.
//!
//! Rows are inserted one by one through the query façade. A uniqueness
//! violation on the natural key means the row is already present; the stored
//! row is left untouched and counted as already present. A violation on any
//! other unique column is an error. Seeding never updates or deletes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog;
use crate::core::{Record, Value};
use crate::error::{ConfigError, DbErrorKind, QueryError, StoreError, StoreResult};
use crate::facade::{Filter, QueryFacade, TableDef};
use crate::selector::BackendHandle;

const REFERENCE_DATA: &str = include_str!("../seeds/reference_data.json");

#[derive(Deserialize)]
struct SeedFile {
    table: String,
    natural_key: String,
    rows: Vec<Record>,
}

/// Rows to seed into one table.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedSet {
    /// Target table.
    pub table: TableDef,
    /// Column holding the natural key.
    pub natural_key: String,
    /// Rows, each carrying the natural key.
    pub rows: Vec<Record>,
}

impl SeedSet {
    /// Creates a seed set.
    pub fn new(table: TableDef, natural_key: impl Into<String>, rows: Vec<Record>) -> Self {
        Self {
            table,
            natural_key: natural_key.into(),
            rows,
        }
    }

    /// Parses seed sets from JSON. Tables must be known to [`catalog`].
    pub fn from_json(json: &str) -> Result<Vec<Self>, ConfigError> {
        let files: Vec<SeedFile> = serde_json::from_str(json).map_err(|e| ConfigError::Invalid {
            key: "seed data".to_string(),
            message: e.to_string(),
        })?;

        files
            .into_iter()
            .map(|file| {
                let table = catalog::all()
                    .into_iter()
                    .find(|t| t.name() == file.table)
                    .ok_or_else(|| ConfigError::Invalid {
                        key: "seed data".to_string(),
                        message: format!("unknown table {}", file.table),
                    })?;
                Ok(Self::new(table, file.natural_key, file.rows))
            })
            .collect()
    }

    /// The reference data shipped with the crate: three roles, three
    /// membership tiers and three event categories.
    pub fn reference_data() -> Vec<Self> {
        Self::from_json(REFERENCE_DATA).expect("embedded reference data is valid")
    }

    fn keys(&self) -> Result<Vec<Value>, QueryError> {
        self.rows
            .iter()
            .map(|row| {
                row.get(&self.natural_key)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .ok_or_else(|| QueryError::UnknownColumn {
                        table: self.table.name().to_string(),
                        column: self.natural_key.clone(),
                    })
            })
            .collect()
    }
}

/// Seeding result for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedTableReport {
    /// Table name.
    pub table: String,
    /// Rows inserted by this run.
    pub inserted: usize,
    /// Rows whose natural key already existed.
    pub already_present: usize,
    /// Rows in the batch.
    pub expected: usize,
    /// Rows found afterwards for the batch's natural keys.
    pub found: u64,
}

impl SeedTableReport {
    /// True when the post-seed count disagrees with the batch size.
    pub fn has_discrepancy(&self) -> bool {
        self.found != self.expected as u64
    }
}

/// Seeding result for several tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Per-table results, in seeding order.
    pub tables: Vec<SeedTableReport>,
}

impl SeedReport {
    /// Total rows inserted.
    pub fn inserted(&self) -> usize {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    /// Total rows already present.
    pub fn already_present(&self) -> usize {
        self.tables.iter().map(|t| t.already_present).sum()
    }

    /// Tables whose post-seed count disagreed with the batch.
    pub fn discrepancies(&self) -> Vec<&SeedTableReport> {
        self.tables.iter().filter(|t| t.has_discrepancy()).collect()
    }
}

/// Inserts seed rows that are not yet present.
#[derive(Debug, Clone)]
pub struct SeedManager {
    facade: QueryFacade,
}

impl SeedManager {
    /// Creates a seed manager for the active backend.
    pub fn new(handle: Arc<BackendHandle>) -> Self {
        Self {
            facade: QueryFacade::new(handle),
        }
    }

    /// Seeds one table.
    pub async fn seed(&self, set: &SeedSet) -> StoreResult<SeedTableReport> {
        let table = set.table.name();
        let keys = set.keys()?;

        let mut inserted = 0;
        let mut already_present = 0;
        for (row, key) in set.rows.iter().zip(&keys) {
            match self.facade.insert(&set.table, row.clone()).await {
                Ok(_) => inserted += 1,
                Err(StoreError::Backend(e)) if e.db_kind() == Some(DbErrorKind::UniqueViolation) => {
                    // Only a collision on the natural key means "already seeded".
                    if !self.key_exists(set, key).await? {
                        return Err(StoreError::Backend(e));
                    }
                    tracing::debug!(table = %table, key = %key, "Seed row already present");
                    already_present += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let found = self
            .facade
            .count(
                &set.table,
                &Filter::new()
                    .is_in(set.natural_key.as_str(), keys)
                    .include_deleted(),
            )
            .await?;

        let report = SeedTableReport {
            table: table.to_string(),
            inserted,
            already_present,
            expected: set.rows.len(),
            found,
        };
        if report.has_discrepancy() {
            tracing::warn!(
                table = %table,
                expected = report.expected,
                found = report.found,
                "Seeded row count does not match the batch"
            );
        }
        tracing::info!(table = %table, inserted, already_present, "Seeded table");
        Ok(report)
    }

    async fn key_exists(&self, set: &SeedSet, key: &Value) -> StoreResult<bool> {
        let filter = Filter::new()
            .eq(set.natural_key.as_str(), key.clone())
            .include_deleted();
        Ok(self.facade.count(&set.table, &filter).await? > 0)
    }

    /// Seeds several tables in order.
    pub async fn seed_all(&self, sets: &[SeedSet]) -> StoreResult<SeedReport> {
        let mut report = SeedReport::default();
        for set in sets {
            report.tables.push(self.seed(set).await?);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_data_has_nine_rows() {
        let sets = SeedSet::reference_data();
        assert_eq!(sets.len(), 3);
        assert_eq!(sets.iter().map(|s| s.rows.len()).sum::<usize>(), 9);
        for set in &sets {
            assert_eq!(set.natural_key, "slug");
            assert_eq!(set.keys().unwrap().len(), set.rows.len());
        }
    }

    #[test]
    fn test_unknown_table_rejected() {
        let err = SeedSet::from_json(r#"[{"table": "nope", "natural_key": "slug", "rows": []}]"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_missing_natural_key_rejected() {
        let set = SeedSet::new(
            catalog::roles(),
            "slug",
            vec![crate::core::value::record([("name", Value::from("x"))])],
        );
        assert!(matches!(set.keys(), Err(QueryError::UnknownColumn { .. })));
    }

    #[test]
    fn test_discrepancy_detection() {
        let report = SeedTableReport {
            table: "roles".to_string(),
            inserted: 2,
            already_present: 1,
            expected: 3,
            found: 2,
        };
        assert!(report.has_discrepancy());
    }
}

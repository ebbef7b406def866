//! Applies migration sets against the active backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::ledger::{self, LedgerEntry};
use super::lock;
use super::{MigrationScript, MigrationSet};
use crate::core::{Connection, Dialect};
use crate::error::{BackendError, BackendResult, DbErrorKind, MigrationError, StoreResult};
use crate::selector::BackendHandle;

/// What happened to one script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Executed and recorded.
    Applied,
    /// Already recorded with the same checksum.
    AlreadyApplied,
    /// Hit an "already exists" error; recorded as applied.
    SkippedBenign {
        /// The benign error.
        reason: String,
    },
    /// Recorded with a different checksum; not re-run.
    Drifted,
    /// Failed; the run stopped here.
    Failed {
        /// The error.
        error: String,
    },
}

/// Per-script outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationOutcome {
    /// Script version.
    pub version: u64,
    /// Script name.
    pub name: String,
    /// Result.
    #[serde(flatten)]
    pub status: MigrationStatus,
    /// Execution time; zero for skipped scripts.
    pub elapsed_ms: u64,
}

/// An applied version whose script body has since changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftWarning {
    /// Version.
    pub version: u64,
    /// Script name.
    pub name: String,
    /// Checksum in the ledger.
    pub recorded_checksum: String,
    /// Checksum of the current body.
    pub current_checksum: String,
}

/// The script that stopped a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMigration {
    /// Version.
    pub version: u64,
    /// Script name.
    pub name: String,
    /// Error message.
    pub message: String,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationCounts {
    /// Scripts executed.
    pub applied: usize,
    /// Scripts recorded after a benign conflict.
    pub skipped_benign: usize,
    /// Scripts already in the ledger.
    pub already_applied: usize,
    /// Applied scripts whose checksum changed.
    pub drifted: usize,
    /// Failed scripts (zero or one).
    pub failed: usize,
    /// Scripts after the failure that were never tried.
    pub not_attempted: usize,
}

/// Result of one [`MigrationRunner::apply`] run.
#[derive(Debug, Serialize)]
pub struct MigrationReport {
    /// Backend the run targeted.
    pub backend: String,
    /// One entry per script that was considered, in version order.
    pub outcomes: Vec<MigrationOutcome>,
    /// Checksum mismatches.
    pub drift: Vec<DriftWarning>,
    /// The failure that halted the run.
    pub failure: Option<FailedMigration>,
    /// Versions after the failure.
    pub not_attempted: Vec<u64>,
    #[serde(skip)]
    cause: Option<BackendError>,
}

impl MigrationReport {
    fn new(backend: String) -> Self {
        Self {
            backend,
            outcomes: Vec::new(),
            drift: Vec::new(),
            failure: None,
            not_attempted: Vec::new(),
            cause: None,
        }
    }

    fn push(&mut self, script: &MigrationScript, status: MigrationStatus, started: Option<Instant>) {
        self.outcomes.push(MigrationOutcome {
            version: script.version,
            name: script.name.clone(),
            status,
            elapsed_ms: started.map_or(0, |s| s.elapsed().as_millis() as u64),
        });
    }

    fn count(&self, pred: impl Fn(&MigrationStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    /// Aggregated counters.
    pub fn counts(&self) -> MigrationCounts {
        MigrationCounts {
            applied: self.count(|s| matches!(s, MigrationStatus::Applied)),
            skipped_benign: self.count(|s| matches!(s, MigrationStatus::SkippedBenign { .. })),
            already_applied: self.count(|s| matches!(s, MigrationStatus::AlreadyApplied)),
            drifted: self.drift.len(),
            failed: usize::from(self.failure.is_some()),
            not_attempted: self.not_attempted.len(),
        }
    }

    /// True when no script failed.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Converts a halted run into [`MigrationError::Failed`].
    pub fn into_result(self) -> Result<Self, MigrationError> {
        match self.failure {
            None => Ok(self),
            Some(failure) => Err(MigrationError::Failed {
                version: failure.version,
                name: failure.name,
                message: failure.message,
                source: self.cause,
            }),
        }
    }
}

/// A script not yet in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMigration {
    /// Version.
    pub version: u64,
    /// Script name.
    pub name: String,
}

/// Ledger contents compared with a script set.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Backend inspected.
    pub backend: String,
    /// Ledger rows.
    pub applied: Vec<LedgerEntry>,
    /// Scripts without a ledger row.
    pub pending: Vec<PendingMigration>,
    /// Applied scripts whose checksum changed.
    pub drift: Vec<DriftWarning>,
    /// Ledger versions with no matching script.
    pub unknown: Vec<u64>,
}

/// Applies versioned scripts under the migration lock.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    handle: Arc<BackendHandle>,
    lock_timeout: Duration,
}

impl MigrationRunner {
    /// Creates a runner for the active backend.
    pub fn new(handle: Arc<BackendHandle>) -> Self {
        Self {
            handle,
            lock_timeout: Duration::from_secs(120),
        }
    }

    /// Bounds the wait for another instance's migration lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Applies every script of `set` not yet recorded, in ascending order.
    ///
    /// A script failure does not produce `Err`: it is recorded in
    /// [`MigrationReport::failure`] and stops the run. `Err` means the run
    /// could not start or the ledger could not be written.
    pub async fn apply(&self, set: &MigrationSet) -> StoreResult<MigrationReport> {
        let dialect = self.handle.dialect();
        let mut conn = self.handle.acquire().await?;

        let lock = lock::acquire(&mut *conn, dialect, self.lock_timeout).await?;
        let result = self.apply_locked(&mut *conn, set).await;
        lock.release(&mut *conn, dialect).await;

        result
    }

    async fn apply_locked(
        &self,
        conn: &mut dyn Connection,
        set: &MigrationSet,
    ) -> StoreResult<MigrationReport> {
        let dialect = self.handle.dialect();
        ledger::ensure(conn, dialect).await?;
        let recorded: BTreeMap<u64, LedgerEntry> = ledger::load(conn, dialect)
            .await?
            .into_iter()
            .map(|entry| (entry.version, entry))
            .collect();

        let mut report = MigrationReport::new(self.handle.descriptor().name());
        let scripts = set.scripts();

        for (idx, script) in scripts.iter().enumerate() {
            if let Some(entry) = recorded.get(&script.version) {
                if entry.checksum == script.checksum() {
                    report.push(script, MigrationStatus::AlreadyApplied, None);
                } else {
                    tracing::warn!(
                        version = script.version,
                        name = %script.name,
                        recorded = %entry.checksum,
                        current = %script.checksum(),
                        "Migration checksum drift; script changed after it was applied"
                    );
                    report.drift.push(DriftWarning {
                        version: script.version,
                        name: script.name.clone(),
                        recorded_checksum: entry.checksum.clone(),
                        current_checksum: script.checksum().to_string(),
                    });
                    report.push(script, MigrationStatus::Drifted, None);
                }
                continue;
            }

            let started = Instant::now();
            match run_script(conn, dialect, script).await {
                Ok(()) => {
                    tracing::info!(version = script.version, name = %script.name, "Applied migration");
                    report.push(script, MigrationStatus::Applied, Some(started));
                }
                Err(e) if e.db_kind() == Some(DbErrorKind::AlreadyExists) => {
                    tracing::warn!(
                        version = script.version,
                        name = %script.name,
                        error = %e,
                        "Schema object already exists; recording migration as applied"
                    );
                    ledger::record(conn, dialect, script)
                        .await
                        .map_err(|e| MigrationError::Ledger {
                            message: e.to_string(),
                        })?;
                    report.push(
                        script,
                        MigrationStatus::SkippedBenign {
                            reason: e.to_string(),
                        },
                        Some(started),
                    );
                }
                Err(e) => {
                    tracing::error!(
                        version = script.version,
                        name = %script.name,
                        error = %e,
                        "Migration failed; halting"
                    );
                    report.push(
                        script,
                        MigrationStatus::Failed {
                            error: e.to_string(),
                        },
                        Some(started),
                    );
                    report.failure = Some(FailedMigration {
                        version: script.version,
                        name: script.name.clone(),
                        message: e.to_string(),
                    });
                    report.cause = Some(e);
                    report.not_attempted = scripts[idx + 1..].iter().map(|s| s.version).collect();
                    break;
                }
            }
        }

        let counts = report.counts();
        tracing::info!(
            backend = %report.backend,
            applied = counts.applied,
            skipped_benign = counts.skipped_benign,
            already_applied = counts.already_applied,
            drifted = counts.drifted,
            failed = counts.failed,
            "Migration run finished"
        );
        Ok(report)
    }

    /// Lists ledger rows. An absent ledger reads as empty.
    pub async fn ledger(&self) -> StoreResult<Vec<LedgerEntry>> {
        let dialect = self.handle.dialect();
        let mut conn = self.handle.acquire().await?;
        if !ledger::exists(&mut *conn, dialect).await? {
            return Ok(Vec::new());
        }
        Ok(ledger::load(&mut *conn, dialect).await?)
    }

    /// Compares the ledger with `set` without changing anything.
    pub async fn status(&self, set: &MigrationSet) -> StoreResult<StatusReport> {
        let applied = self.ledger().await?;
        let recorded: BTreeMap<u64, &LedgerEntry> =
            applied.iter().map(|entry| (entry.version, entry)).collect();

        let mut pending = Vec::new();
        let mut drift = Vec::new();
        for script in set.scripts() {
            match recorded.get(&script.version) {
                None => pending.push(PendingMigration {
                    version: script.version,
                    name: script.name.clone(),
                }),
                Some(entry) if entry.checksum != script.checksum() => drift.push(DriftWarning {
                    version: script.version,
                    name: script.name.clone(),
                    recorded_checksum: entry.checksum.clone(),
                    current_checksum: script.checksum().to_string(),
                }),
                Some(_) => {}
            }
        }
        let unknown = applied
            .iter()
            .map(|entry| entry.version)
            .filter(|v| !set.scripts().iter().any(|s| s.version == *v))
            .collect();

        Ok(StatusReport {
            backend: self.handle.descriptor().name(),
            applied,
            pending,
            drift,
            unknown,
        })
    }
}

/// Runs one script and its ledger row as a single unit.
async fn run_script(
    conn: &mut dyn Connection,
    dialect: &dyn Dialect,
    script: &MigrationScript,
) -> BackendResult<()> {
    let transactional = dialect.supports_transactional_ddl();
    if transactional {
        conn.begin().await?;
    }

    let result = match conn.execute_batch(&script.body).await {
        Ok(()) => ledger::record(conn, dialect, script).await,
        Err(e) => Err(e),
    };
    let result = match result {
        Ok(()) if transactional => conn.commit().await,
        other => other,
    };

    if let Err(e) = result {
        if transactional && let Err(rollback) = conn.rollback().await {
            tracing::warn!(version = script.version, error = %rollback, "Rollback failed");
        }
        return Err(e);
    }
    Ok(())
}

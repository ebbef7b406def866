//! Versioned schema migrations.
//!
//! Scripts are identified by a numeric version and applied in ascending
//! order. Each applied version is recorded in the `schema_migrations` ledger
//! together with a SHA-256 checksum of its body, so re-running the same set is
//! a no-op and edited scripts are reported as drift.
//!
//! # Script sources
//!
//! - [`MigrationSet::embedded`]: the scripts compiled into the crate
//! - [`MigrationSet::from_dir`]: `NNNN_name.sql` files, with optional
//!   `NNNN_name.<dialect>.sql` variants taking precedence for that dialect
//!
//! # Concurrency
//!
//! The runner holds a migration lock for the whole run: a session advisory
//! lock where the dialect has one, otherwise a single-row lock table.
//! Instances that lose the race wait for the holder and then find every
//! version already recorded.

mod ledger;
mod lock;
mod runner;
mod source;

use sha2::{Digest, Sha256};

pub use ledger::{LEDGER_TABLE, LedgerEntry};
pub use lock::LOCK_TABLE;
pub use runner::{
    DriftWarning, FailedMigration, MigrationCounts, MigrationOutcome, MigrationReport, MigrationRunner,
    MigrationStatus, PendingMigration, StatusReport,
};
pub use source::MigrationSet;

/// One versioned schema script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// Monotonic version.
    pub version: u64,
    /// Descriptive name.
    pub name: String,
    /// SQL body, possibly several statements.
    pub body: String,
    checksum: String,
}

impl MigrationScript {
    /// Creates a script and computes its checksum.
    pub fn new(version: u64, name: impl Into<String>, body: impl Into<String>) -> Self {
        let body = body.into();
        let checksum = checksum(&body);
        Self {
            version,
            name: name.into(),
            body,
            checksum,
        }
    }

    /// Hex-encoded SHA-256 of the body.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

/// Computes the ledger checksum of a script body.
///
/// Line endings are normalized so a checkout with CRLF endings does not
/// register as drift.
pub fn checksum(body: &str) -> String {
    let normalized = body.replace("\r\n", "\n");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

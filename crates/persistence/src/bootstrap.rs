//! Startup sequence: resolve a backend, migrate, seed, verify, then hand out
//! the query façade.
//!
//! Any failure before the façade is returned aborts startup. Missing tables
//! found by verification are reported, not raised.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::facade::QueryFacade;
use crate::migration::{MigrationReport, MigrationRunner, MigrationSet};
use crate::schema::{SchemaExpectation, SchemaReport, SchemaVerifier};
use crate::seed::{SeedManager, SeedReport, SeedSet};
use crate::selector::{BackendHandle, BackendSelector};

/// What [`initialize`] applies.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    /// Migration lock wait.
    pub lock_timeout: Duration,
    /// Script directory; the embedded set for the active dialect when `None`.
    pub migrations_dir: Option<PathBuf>,
    /// Reference data, seeded in order.
    pub seeds: Vec<SeedSet>,
    /// Tables checked after seeding.
    pub expectations: Vec<SchemaExpectation>,
}

impl Default for StartupOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(120),
            migrations_dir: None,
            seeds: SeedSet::reference_data(),
            expectations: SchemaExpectation::application_tables(),
        }
    }
}

impl StartupOptions {
    /// Options taken from the store configuration, with the shipped seeds
    /// and expectations.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            lock_timeout: config.lock_timeout(),
            migrations_dir: config.migrations_dir.clone(),
            ..Self::default()
        }
    }

    /// Loads the migration set for `handle`'s dialect.
    pub fn migration_set(&self, handle: &BackendHandle) -> StoreResult<MigrationSet> {
        let dialect = handle.dialect().kind();
        match &self.migrations_dir {
            Some(dir) => Ok(MigrationSet::from_dir(dir, dialect)?),
            None => Ok(MigrationSet::embedded(dialect)),
        }
    }
}

/// A ready store.
#[derive(Debug)]
pub struct Startup {
    /// The active backend.
    pub handle: Arc<BackendHandle>,
    /// Migration run.
    pub migrations: MigrationReport,
    /// Seeding run.
    pub seeds: SeedReport,
    /// Schema check.
    pub schema: SchemaReport,
    /// Query surface over the active backend.
    pub facade: QueryFacade,
}

/// Runs the full startup sequence.
pub async fn initialize(selector: &BackendSelector, options: StartupOptions) -> StoreResult<Startup> {
    let handle = selector.resolve().await?;
    let backend = handle.descriptor().name();

    let set = options.migration_set(&handle)?;
    let migrations = MigrationRunner::new(handle.clone())
        .with_lock_timeout(options.lock_timeout)
        .apply(&set)
        .await?
        .into_result()?;
    let counts = migrations.counts();
    tracing::info!(
        backend = %backend,
        applied = counts.applied,
        skipped_benign = counts.skipped_benign,
        already_applied = counts.already_applied,
        "Migrations complete"
    );

    let seeds = SeedManager::new(handle.clone())
        .seed_all(&options.seeds)
        .await?;

    let schema = SchemaVerifier::new(handle.clone())
        .verify(&options.expectations)
        .await?;
    if !schema.all_ok() {
        tracing::warn!(backend = %backend, missing = ?schema.missing(), "Schema is incomplete");
    }

    tracing::info!(backend = %backend, "Store ready");
    Ok(Startup {
        facade: QueryFacade::new(handle.clone()),
        handle,
        migrations,
        seeds,
        schema,
    })
}

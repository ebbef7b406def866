//! Command implementations.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use guild_persistence::backends::DriverFactory;
use guild_persistence::bootstrap::StartupOptions;
use guild_persistence::config::StoreConfig;
use guild_persistence::error::ConfigError;
use guild_persistence::migration::MigrationRunner;
use guild_persistence::probe;
use guild_persistence::schema::{SchemaExpectation, SchemaVerifier};
use guild_persistence::seed::{SeedManager, SeedSet};
use guild_persistence::selector::BackendSelector;
use guild_persistence::{BackendHandle, StoreError};
use serde::Serialize;
use serde_json::json;

use crate::Command;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `command`. `Ok(false)` means the command ran but reported failure.
pub async fn run(command: Command, config: &StoreConfig) -> anyhow::Result<bool> {
    match command {
        Command::CheckConnection => check_connection(config).await,
        Command::RunMigrations => {
            let handle = resolve(config).await?;
            finish(&handle, run_migrations(&handle, config).await).await
        }
        Command::Seed => {
            let handle = resolve(config).await?;
            finish(&handle, seed(&handle).await).await
        }
        Command::VerifySchema => {
            let handle = resolve(config).await?;
            finish(&handle, verify_schema(&handle).await).await
        }
        Command::MigrationStatus => {
            let handle = resolve(config).await?;
            finish(&handle, migration_status(&handle, config).await).await
        }
    }
}

async fn resolve(config: &StoreConfig) -> anyhow::Result<Arc<BackendHandle>> {
    let selector = BackendSelector::from_config(config)?;
    Ok(selector.resolve().await?)
}

async fn finish(handle: &BackendHandle, result: anyhow::Result<bool>) -> anyhow::Result<bool> {
    handle.shutdown(SHUTDOWN_TIMEOUT).await;
    result
}

/// Exit status for an error that stopped a command.
pub fn exit_status(error: &anyhow::Error) -> u8 {
    let config_error = error.downcast_ref::<ConfigError>().is_some()
        || matches!(error.downcast_ref::<StoreError>(), Some(StoreError::Config(_)));
    if config_error { 2 } else { 1 }
}

fn print_summary<T: Serialize>(summary: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, summary).context("writing summary")?;
    writeln!(stdout)?;
    Ok(())
}

async fn check_connection(config: &StoreConfig) -> anyhow::Result<bool> {
    let descriptors = config.descriptors()?;
    let reports = probe::probe_all(&descriptors, &DriverFactory, config.probe_timeout()).await?;
    let healthy = reports.iter().filter(|r| r.outcome.is_healthy()).count();

    print_summary(&json!({
        "healthy": healthy,
        "total": reports.len(),
        "descriptors": reports,
    }))?;
    Ok(healthy > 0)
}

async fn run_migrations(handle: &Arc<BackendHandle>, config: &StoreConfig) -> anyhow::Result<bool> {
    let set = StartupOptions::from_config(config).migration_set(handle)?;
    let report = MigrationRunner::new(handle.clone())
        .with_lock_timeout(config.lock_timeout())
        .apply(&set)
        .await?;

    let counts = report.counts();
    print_summary(&json!({
        "backend": report.backend,
        "applied": counts.applied,
        "skipped_benign": counts.skipped_benign,
        "already_applied": counts.already_applied,
        "failed": counts.failed,
        "not_attempted": counts.not_attempted,
        "drift": report.drift,
        "outcomes": report.outcomes,
        "failure": report.failure,
    }))?;

    match report.into_result() {
        Ok(_) => Ok(true),
        Err(e) => {
            eprintln!("Migration failed: {}", e);
            Ok(false)
        }
    }
}

async fn seed(handle: &Arc<BackendHandle>) -> anyhow::Result<bool> {
    let report = SeedManager::new(handle.clone())
        .seed_all(&SeedSet::reference_data())
        .await?;

    print_summary(&json!({
        "backend": handle.descriptor().name(),
        "inserted": report.inserted(),
        "already_present": report.already_present(),
        "tables": report.tables,
    }))?;
    Ok(true)
}

async fn verify_schema(handle: &Arc<BackendHandle>) -> anyhow::Result<bool> {
    let report = SchemaVerifier::new(handle.clone())
        .verify(&SchemaExpectation::application_tables())
        .await?;

    print_summary(&report)?;
    Ok(true)
}

async fn migration_status(handle: &Arc<BackendHandle>, config: &StoreConfig) -> anyhow::Result<bool> {
    let set = StartupOptions::from_config(config).migration_set(handle)?;
    let status = MigrationRunner::new(handle.clone()).status(&set).await?;

    print_summary(&status)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status() {
        let config = anyhow::Error::from(StoreError::Config(ConfigError::NoDescriptors));
        assert_eq!(exit_status(&config), 2);

        let bare = anyhow::Error::from(ConfigError::NoDescriptors);
        assert_eq!(exit_status(&bare), 2);

        let other = anyhow::anyhow!("connection refused");
        assert_eq!(exit_status(&other), 1);
    }
}

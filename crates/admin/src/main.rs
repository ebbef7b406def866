//! Guild database administration.
//!
//! Every command prints a JSON summary on stdout and logs to stderr. Exit
//! status is 0 on success, 1 on a failed operation and 2 on a configuration
//! error.

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use guild_persistence::config::StoreConfig;
use tracing::info;

/// Guild database administration.
#[derive(Debug, Parser)]
#[command(name = "guild-admin", version, about)]
struct Cli {
    #[command(flatten)]
    store: StoreConfig,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "GUILD_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Probe every configured backend and report its health.
    CheckConnection,
    /// Apply pending migration scripts to the selected backend.
    RunMigrations,
    /// Insert reference data that is not yet present.
    Seed,
    /// Report which application tables exist.
    VerifySchema,
    /// List applied and pending migrations.
    MigrationStatus,
}

/// Installs a stderr subscriber so stdout carries only summaries.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("guild_persistence={level},guild_admin={level}"))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if let Err(errors) = cli.store.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        return ExitCode::from(2);
    }

    info!(command = ?cli.command, "Running admin command");

    match commands::run(cli.command, &cli.store).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(commands::exit_status(&e))
        }
    }
}

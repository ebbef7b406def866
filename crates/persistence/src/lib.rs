//! Guild Persistence Layer
//!
//! This crate lets the Guild application run unmodified against one of several
//! relational stores: a managed network database, a local database server, or an
//! embedded file-backed database. It decides at startup which store is usable,
//! applies versioned schema scripts, seeds fixed reference data, verifies the
//! resulting schema and exposes a uniform query surface over whichever backend
//! was chosen.
//!
//! # Backend Features
//!
//! - `sqlite` (default) - embedded file-backed store via rusqlite
//! - `postgres` (default) - managed or local PostgreSQL via tokio-postgres
//!
//! # Architecture
//!
//! Startup flows leaf-first through the following modules:
//!
//! - [`probe`] - minimal liveness checks against one descriptor
//! - [`selector`] - priority-ordered failover, producing the [`BackendHandle`]
//! - [`pool`] - bounded connection pool bound to the active backend
//! - [`migration`] - ledger-tracked, checksummed schema scripts
//! - [`seed`] - idempotent reference data keyed by natural key
//! - [`schema`] - table existence report
//! - [`facade`] - dialect-normalized CRUD for external callers
//!
//! [`bootstrap::initialize`] runs the whole sequence.
//!
//! # Quick Start
//!
//! ```no_run
//! use guild_persistence::bootstrap::{initialize, StartupOptions};
//! use guild_persistence::config::StoreConfig;
//! use guild_persistence::selector::BackendSelector;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::default().with_embedded_path("./guild.db");
//! let selector = BackendSelector::from_config(&config)?;
//!
//! let startup = initialize(&selector, StartupOptions::from_config(&config)).await?;
//! assert!(startup.schema.all_ok());
//!
//! let roles = startup.facade.count(&guild_persistence::catalog::roles(), &Default::default()).await?;
//! println!("{roles} roles");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod facade;
pub mod migration;
pub mod pool;
pub mod probe;
pub mod schema;
pub mod seed;
pub mod selector;

pub use error::{StoreError, StoreResult};
pub use selector::BackendHandle;

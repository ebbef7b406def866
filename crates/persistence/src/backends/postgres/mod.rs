//! PostgreSQL backend implementation.
//!
//! Serves both network descriptors: the managed primary (one connection URL)
//! and the local secondary server (discrete host/port/credential settings).
//!
//! # Dialect notes
//!
//! - native `BOOLEAN`
//! - generated ids come back through `RETURNING`
//! - migrations serialize through `pg_try_advisory_lock`
//! - connections are opened without TLS

mod backend;
mod dialect;

pub use backend::{PostgresAdapter, PostgresConnection};
pub use dialect::PostgresDialect;

pub(crate) use backend::classify;

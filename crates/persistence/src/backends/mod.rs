//! Database backend implementations.
//!
//! Each backend is gated behind a feature flag and provides one
//! [`BackendAdapter`](crate::core::BackendAdapter) plus its
//! [`Dialect`](crate::core::Dialect).
//!
//! # Available Backends
//!
//! | Backend | Feature | Used for |
//! |---------|---------|----------|
//! | SQLite | `sqlite` | embedded descriptors |
//! | PostgreSQL | `postgres` | primary (managed URL) and secondary (local server) descriptors |

use std::sync::Arc;

use crate::core::{BackendAdapter, BackendDescriptor, ConnectionParams, DialectKind};
use crate::error::ConfigError;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Turns descriptors into adapters.
///
/// The selector and the probe go through this seam so tests can substitute
/// scripted adapters for real drivers.
pub trait AdapterFactory: Send + Sync + std::fmt::Debug {
    /// Builds the adapter for `descriptor`.
    fn adapter(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn BackendAdapter>, ConfigError>;
}

/// Factory backed by the compiled-in drivers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverFactory;

impl AdapterFactory for DriverFactory {
    fn adapter(&self, descriptor: &BackendDescriptor) -> Result<Arc<dyn BackendAdapter>, ConfigError> {
        adapter_for(descriptor)
    }
}

/// Builds the adapter matching a descriptor's dialect and parameters.
pub fn adapter_for(
    descriptor: &BackendDescriptor,
) -> Result<Arc<dyn BackendAdapter>, ConfigError> {
    match (descriptor.dialect, &descriptor.params) {
        #[cfg(feature = "sqlite")]
        (DialectKind::Sqlite, ConnectionParams::File { path }) => Ok(Arc::new(
            sqlite::SqliteAdapter::open(path, sqlite::SqliteConfig::default()),
        )),

        #[cfg(feature = "postgres")]
        (DialectKind::Postgres, params @ (ConnectionParams::Url { .. } | ConnectionParams::Server { .. })) => {
            Ok(Arc::new(postgres::PostgresAdapter::from_params(params)?))
        }

        (dialect, params) => Err(ConfigError::Invalid {
            key: descriptor.kind.to_string(),
            message: format!(
                "dialect {} cannot be used with {} (or its feature is disabled)",
                dialect,
                match params {
                    ConnectionParams::Url { .. } => "a connection URL",
                    ConnectionParams::Server { .. } => "server parameters",
                    ConnectionParams::File { .. } => "a file path",
                }
            ),
        }),
    }
}

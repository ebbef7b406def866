//! Backend-agnostic abstractions.
//!
//! - [`value`] - the value and record types exchanged with every backend
//! - [`descriptor`] - static configuration of one backend
//! - [`backend`] - the capability interface each backend adapter implements

pub mod backend;
pub mod descriptor;
pub mod value;

pub use backend::{AdvisoryLockSql, BackendAdapter, Connection, Dialect, DialectKind};
pub use descriptor::{BackendDescriptor, BackendKind, ConnectionParams};
pub use value::{Record, Value};

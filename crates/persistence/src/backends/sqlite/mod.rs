//! SQLite backend implementation.
//!
//! Serves embedded descriptors: a single database file opened with
//! rusqlite. Every pooled connection opens the same file; WAL mode and a
//! busy timeout let them coexist.
//!
//! # Dialect notes
//!
//! - booleans are stored as `INTEGER` 0/1
//! - generated ids come from `last_insert_rowid()`
//! - there is no advisory lock, so migrations serialize through a lock table

mod backend;
mod dialect;

pub use backend::{SqliteAdapter, SqliteConfig, SqliteConnection};
pub use dialect::SqliteDialect;

pub(crate) use backend::classify;

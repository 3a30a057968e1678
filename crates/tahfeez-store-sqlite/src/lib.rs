//! SQLite backend for the Tahfeez local store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Opening a store runs the
//! migration runner to completion; a store that opened is always at the
//! newest schema version of its ladder.

mod encode;
mod schema;
mod store;
mod tx;

pub mod error;
pub mod migrate;

pub use error::{Error, Result};
pub use migrate::MigrationReport;
pub use store::SqliteStore;

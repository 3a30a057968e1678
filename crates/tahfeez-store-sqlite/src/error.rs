//! Error type for `tahfeez-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tahfeez_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// Upgrading into `version` failed; the store is left at the version
  /// before it.
  #[error("migration to schema version {version} failed: {reason}")]
  Migration { version: u32, reason: String },

  /// The file was written by a newer build.
  #[error("store is at schema version {disk} but this build only knows up to {known}")]
  FutureVersion { disk: u32, known: u32 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

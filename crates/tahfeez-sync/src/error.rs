//! Error types for `tahfeez-sync`.

use thiserror::Error;

/// Why a sync cycle did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unavailable {
  #[error("no remote is configured")]
  NotConfigured,
  #[error("the remote cannot be reached")]
  Offline,
}

#[derive(Debug, Error)]
pub enum RemoteError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("GET {table} returned {status}")]
  Status { table: String, status: u16 },

  #[error("unexpected payload for {table}: {reason}")]
  Shape { table: String, reason: String },

  #[error("remote is not configured")]
  NotConfigured,
}

#[derive(Debug, Error)]
pub enum SyncError {
  /// Preconditions failed; the store was not touched.
  #[error("sync unavailable: {0}")]
  Unavailable(#[from] Unavailable),

  /// Another cycle is in flight.
  #[error("a sync is already running")]
  AlreadyRunning,

  /// Fetching a snapshot failed; the store was not touched.
  #[error("fetching {table} failed: {source}")]
  Fetch {
    table:  String,
    #[source]
    source: RemoteError,
  },

  /// Applying the snapshots failed and was rolled back.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl SyncError {
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

//! Error types for `tahfeez-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A write or read named a table the current schema does not declare.
  #[error("table {0:?} does not exist")]
  UnknownTable(String),

  #[error("table {table:?} has no index {index:?}")]
  UnknownIndex { table: String, index: String },

  /// A transaction body touched a table outside its declared scope.
  #[error("table {0:?} is not part of this transaction")]
  TableNotInScope(String),

  /// The document carries no usable primary key and none can be generated.
  #[error("document for {table:?} has no primary key at {path}")]
  MissingKey { table: String, path: String },

  #[error("invalid schema: {0}")]
  InvalidSchema(String),

  #[error("unsupported matcher on index {index:?}: {reason}")]
  UnsupportedMatcher { index: String, reason: String },

  /// A uniqueness constraint rejected the write.
  #[error("constraint violated on {table:?}: {reason}")]
  Constraint { table: String, reason: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("storage backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn backend<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Backend(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

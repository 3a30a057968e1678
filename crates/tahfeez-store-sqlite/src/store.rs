//! [`SqliteStore`]: the SQLite implementation of [`LocalStore`].

use std::{path::Path, sync::Arc};

use rusqlite::{Connection, TransactionBehavior};
use tahfeez_core::{
  Document, IndexQuery, Key, LocalStore, SchemaLadder, SchemaVersion, StoreTx,
  catalog::school_ladder,
};

use crate::{
  Error, Result,
  migrate::{self, MigrationReport},
  tx::SqliteTx,
};

type CoreResult<T> = tahfeez_core::Result<T>;

// ─── Store ───────────────────────────────────────────────────────────────────

/// A school store backed by a single SQLite file, migrated to the newest
/// schema version on open.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:      tokio_rusqlite::Connection,
  schema:    Arc<SchemaVersion>,
  migration: MigrationReport,
}

impl SqliteStore {
  /// Open (or create) the store at `path` with the school schema.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with_ladder(path, school_ladder()?).await
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    Self::open_in_memory_with_ladder(school_ladder()?).await
  }

  pub async fn open_with_ladder(path: impl AsRef<Path>, ladder: SchemaLadder) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, ladder).await
  }

  pub async fn open_in_memory_with_ladder(ladder: SchemaLadder) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, ladder).await
  }

  async fn init(conn: tokio_rusqlite::Connection, ladder: SchemaLadder) -> Result<Self> {
    let runner = ladder.clone();
    let migration = conn
      .call(move |conn| Ok(migrate::run(conn, &runner)))
      .await??;
    Ok(Self {
      conn,
      schema: Arc::new(ladder.latest().clone()),
      migration,
    })
  }

  /// What the migration runner did when this store was opened.
  pub fn migration(&self) -> &MigrationReport { &self.migration }

  /// The version recorded in the database file.
  pub async fn schema_version(&self) -> Result<u32> {
    Ok(
      self
        .conn
        .call(|conn| Ok(migrate::user_version(conn)?))
        .await?,
    )
  }

  /// Run `body` against the bare connection. Each statement is atomic on
  /// its own.
  async fn read<T, F>(&self, scope: Vec<String>, body: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn StoreTx) -> CoreResult<T> + Send + 'static,
  {
    let schema = Arc::clone(&self.schema);
    self
      .conn
      .call(move |conn| {
        let mut handle = SqliteTx::new(conn, &schema, Some(scope));
        Ok(body(&mut handle).map_err(Error::from))
      })
      .await?
  }

  /// Run `body` inside an immediate transaction, committing only when it
  /// succeeds.
  async fn write<T, F>(&self, scope: Vec<String>, body: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn StoreTx) -> CoreResult<T> + Send + 'static,
  {
    let schema = Arc::clone(&self.schema);
    self
      .conn
      .call(move |conn| Ok(in_transaction(conn, &schema, scope, body)))
      .await?
  }
}

fn in_transaction<T>(
  conn: &mut Connection,
  schema: &SchemaVersion,
  scope: Vec<String>,
  body: impl FnOnce(&mut dyn StoreTx) -> CoreResult<T>,
) -> Result<T> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let out = {
    let mut handle = SqliteTx::new(&tx, schema, Some(scope));
    body(&mut handle)?
  };
  tx.commit()?;
  Ok(out)
}

// ─── LocalStore impl ─────────────────────────────────────────────────────────

impl LocalStore for SqliteStore {
  type Error = Error;

  fn schema(&self) -> &SchemaVersion { &self.schema }

  async fn get(&self, table: &str, key: &Key) -> Result<Option<Document>> {
    let (table, key) = (table.to_owned(), key.clone());
    self
      .read(vec![table.clone()], move |tx| tx.get(&table, &key))
      .await
  }

  async fn scan(&self, query: &IndexQuery) -> Result<Vec<Document>> {
    let query = query.clone();
    self
      .read(vec![query.table.clone()], move |tx| tx.query(&query))
      .await
  }

  async fn count(&self, query: &IndexQuery) -> Result<usize> {
    let query = query.clone();
    self
      .read(vec![query.table.clone()], move |tx| tx.count(&query))
      .await
  }

  async fn put(&self, table: &str, doc: Document) -> Result<Key> {
    let table = table.to_owned();
    self
      .write(vec![table.clone()], move |tx| tx.put(&table, doc))
      .await
  }

  async fn bulk_put(&self, table: &str, docs: Vec<Document>) -> Result<Vec<Key>> {
    let table = table.to_owned();
    self
      .write(vec![table.clone()], move |tx| tx.bulk_put(&table, docs))
      .await
  }

  async fn delete(&self, table: &str, key: &Key) -> Result<bool> {
    let (table, key) = (table.to_owned(), key.clone());
    self
      .write(vec![table.clone()], move |tx| tx.delete(&table, &key))
      .await
  }

  async fn bulk_delete(&self, table: &str, keys: &[Key]) -> Result<usize> {
    let (table, keys) = (table.to_owned(), keys.to_vec());
    self
      .write(vec![table.clone()], move |tx| tx.bulk_delete(&table, &keys))
      .await
  }

  async fn clear(&self, table: &str) -> Result<usize> {
    let table = table.to_owned();
    self
      .write(vec![table.clone()], move |tx| tx.clear(&table))
      .await
  }

  async fn transaction<T, F>(&self, tables: &[&str], body: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn StoreTx) -> CoreResult<T> + Send + 'static,
  {
    for table in tables {
      self.schema.require_table(table)?;
    }
    let scope = tables.iter().map(|t| (*t).to_owned()).collect();
    self.write(scope, body).await
  }
}

//! The `LocalStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g.
//! `tahfeez-store-sqlite`). Higher layers (the write façade, sync and
//! notification engines) depend on this abstraction, not on any concrete
//! backend.

use std::{future::Future, ops::Bound};

use serde_json::Value;

use crate::{
  Result,
  document::{Document, Key},
  ladder::SchemaVersion,
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Which documents of an index a query selects.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
  All,
  Equals(Value),
  AnyOf(Vec<Value>),
  Range { lower: Bound<Value>, upper: Bound<Value> },
  /// String values beginning with the prefix.
  StartsWith(String),
}

impl Matcher {
  pub fn equals(value: impl Into<Value>) -> Self { Matcher::Equals(value.into()) }

  /// `lower <= v < upper`.
  pub fn between(lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
    Matcher::Range {
      lower: Bound::Included(lower.into()),
      upper: Bound::Excluded(upper.into()),
    }
  }

  pub fn at_least(value: impl Into<Value>) -> Self {
    Matcher::Range { lower: Bound::Included(value.into()), upper: Bound::Unbounded }
  }

  pub fn above(value: impl Into<Value>) -> Self {
    Matcher::Range { lower: Bound::Excluded(value.into()), upper: Bound::Unbounded }
  }

  pub fn at_most(value: impl Into<Value>) -> Self {
    Matcher::Range { lower: Bound::Unbounded, upper: Bound::Included(value.into()) }
  }

  pub fn below(value: impl Into<Value>) -> Self {
    Matcher::Range { lower: Bound::Unbounded, upper: Bound::Excluded(value.into()) }
  }

  pub fn starts_with(prefix: impl Into<String>) -> Self { Matcher::StartsWith(prefix.into()) }
}

/// A fully described index scan. Plain data: running it twice re-reads the
/// store from the start.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
  pub table:   String,
  /// Index name (`"date"`, `"[student_id+date]"`); `None` scans by primary key.
  pub index:   Option<String>,
  pub matcher: Matcher,
  pub reverse: bool,
  pub limit:   Option<usize>,
}

impl IndexQuery {
  pub fn new(table: impl Into<String>, index: impl Into<String>, matcher: Matcher) -> Self {
    Self {
      table: table.into(),
      index: Some(index.into()),
      matcher,
      reverse: false,
      limit: None,
    }
  }

  /// Every document of `table`, in primary-key order.
  pub fn all(table: impl Into<String>) -> Self {
    Self {
      table:   table.into(),
      index:   None,
      matcher: Matcher::All,
      reverse: false,
      limit:   None,
    }
  }

  pub fn reverse(mut self) -> Self {
    self.reverse = !self.reverse;
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }
}

// ─── Transaction handle ──────────────────────────────────────────────────────

/// Synchronous access to the store inside a transaction scope.
///
/// Every call runs against the same open transaction; nothing is visible to
/// other readers until the scope commits, and everything is discarded if
/// the scope's body returns an error.
pub trait StoreTx {
  fn get(&mut self, table: &str, key: &Key) -> Result<Option<Document>>;

  fn query(&mut self, query: &IndexQuery) -> Result<Vec<Document>>;

  fn count(&mut self, query: &IndexQuery) -> Result<usize>;

  /// Upsert by primary key. Auto-increment tables assign the next key when
  /// the document has none. Returns the stored key.
  fn put(&mut self, table: &str, doc: Document) -> Result<Key>;

  fn bulk_put(&mut self, table: &str, docs: Vec<Document>) -> Result<Vec<Key>> {
    docs.into_iter().map(|doc| self.put(table, doc)).collect()
  }

  /// Returns whether a document was removed.
  fn delete(&mut self, table: &str, key: &Key) -> Result<bool>;

  fn bulk_delete(&mut self, table: &str, keys: &[Key]) -> Result<usize> {
    let mut removed = 0;
    for key in keys {
      if self.delete(table, key)? {
        removed += 1;
      }
    }
    Ok(removed)
  }

  /// Remove every document. Auto-increment counters are not reset.
  fn clear(&mut self, table: &str) -> Result<usize>;

  /// Run `f` over every document of `table`, persisting those for which it
  /// returns `true`. Primary keys must not be changed by `f`.
  fn modify(&mut self, table: &str, f: &mut dyn FnMut(&mut Document) -> bool) -> Result<usize>;
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the client-resident document store.
///
/// Multi-document calls are atomic with respect to readers. All methods
/// return `Send` futures so the store can be shared across tokio tasks.
pub trait LocalStore: Send + Sync {
  type Error: std::error::Error + From<crate::Error> + Send + Sync + 'static;

  /// The schema the store was migrated to when it was opened.
  fn schema(&self) -> &SchemaVersion;

  fn get<'a>(
    &'a self,
    table: &'a str,
    key: &'a Key,
  ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send + 'a;

  /// Execute an index scan and collect its documents.
  fn scan<'a>(
    &'a self,
    query: &'a IndexQuery,
  ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a;

  fn count<'a>(
    &'a self,
    query: &'a IndexQuery,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  fn put<'a>(
    &'a self,
    table: &'a str,
    doc: Document,
  ) -> impl Future<Output = Result<Key, Self::Error>> + Send + 'a;

  fn bulk_put<'a>(
    &'a self,
    table: &'a str,
    docs: Vec<Document>,
  ) -> impl Future<Output = Result<Vec<Key>, Self::Error>> + Send + 'a;

  fn delete<'a>(
    &'a self,
    table: &'a str,
    key: &'a Key,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn bulk_delete<'a>(
    &'a self,
    table: &'a str,
    keys: &'a [Key],
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  fn clear<'a>(
    &'a self,
    table: &'a str,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Run `body` with exclusive read/write access to `tables`.
  ///
  /// If `body` returns an error, every write it performed is rolled back
  /// and the error is returned.
  fn transaction<'a, T, F>(
    &'a self,
    tables: &'a [&'a str],
    body: F,
  ) -> impl Future<Output = Result<T, Self::Error>> + Send + 'a
  where
    T: Send + 'static,
    F: FnOnce(&mut dyn StoreTx) -> Result<T> + Send + 'static;

  // ── Provided ──────────────────────────────────────────────────────────

  /// Build a lazy collection over `index` of `table`. Nothing is read until
  /// one of the collection's terminal methods runs.
  fn query(
    &self,
    table: impl Into<String>,
    index: impl Into<String>,
    matcher: Matcher,
  ) -> Collection<'_, Self>
  where
    Self: Sized,
  {
    Collection::new(self, IndexQuery::new(table, index, matcher))
  }

  /// Every document of `table`, in primary-key order.
  fn to_vec<'a>(
    &'a self,
    table: &'a str,
  ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a {
    async move { self.scan(&IndexQuery::all(table)).await }
  }
}

// ─── Collection ──────────────────────────────────────────────────────────────

/// A finite, restartable sequence of documents matching an [`IndexQuery`].
pub struct Collection<'s, S> {
  store: &'s S,
  query: IndexQuery,
}

impl<'s, S: LocalStore> Collection<'s, S> {
  pub fn new(store: &'s S, query: IndexQuery) -> Self { Self { store, query } }

  pub fn reverse(mut self) -> Self {
    self.query = self.query.reverse();
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.query = self.query.limit(limit);
    self
  }

  pub fn as_query(&self) -> &IndexQuery { &self.query }

  pub async fn to_vec(&self) -> Result<Vec<Document>, S::Error> {
    self.store.scan(&self.query).await
  }

  pub async fn first(&self) -> Result<Option<Document>, S::Error> {
    let query = self.query.clone().limit(1);
    Ok(self.store.scan(&query).await?.into_iter().next())
  }

  pub async fn count(&self) -> Result<usize, S::Error> {
    self.store.count(&self.query).await
  }

  pub async fn primary_keys(&self) -> Result<Vec<Key>, S::Error> {
    let path = self
      .store
      .schema()
      .require_table(&self.query.table)?
      .primary_key
      .path
      .clone();
    let docs = self.store.scan(&self.query).await?;
    Ok(docs.iter().filter_map(|doc| path.extract(doc)).collect())
  }
}

//! [`SchoolDb`]: the single write path every feature module goes through.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::{
  Error,
  catalog::{self, Dependent, DependentAction},
  document::{Document, Key, get_path, set_path},
  ladder::SchemaVersion,
  schema::KeyPath,
  settings::{SETTINGS_KEY, Settings},
  store::{Collection, IndexQuery, LocalStore, Matcher},
};

/// Repository handle shared by every feature module.
///
/// Constructed once at startup around an opened store; cloning shares the
/// store.
pub struct SchoolDb<S> {
  store: Arc<S>,
}

impl<S> Clone for SchoolDb<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store) } }
}

impl<S: LocalStore> SchoolDb<S> {
  pub fn new(store: S) -> Self { Self { store: Arc::new(store) } }

  pub fn from_shared(store: Arc<S>) -> Self { Self { store } }

  pub fn store(&self) -> &S { &self.store }

  pub fn schema(&self) -> &SchemaVersion { self.store.schema() }

  // ── Writes ────────────────────────────────────────────────────────────

  /// Insert or replace `doc` in `table`, generating a UUID primary key when
  /// the document has none. Returns the key written.
  pub async fn save_data(&self, table: &str, mut doc: Document) -> Result<Key, S::Error> {
    let schema = self.schema().require_table(table)?;
    let pk = &schema.primary_key;

    match &pk.path {
      KeyPath::Field(field) if key_missing(&doc, field) => {
        if pk.auto_increment {
          // Let the store assign the next sequence value.
          doc.remove(field);
        } else {
          set_path(&mut doc, field, Value::String(Uuid::new_v4().to_string()));
        }
      }
      KeyPath::Compound(fields) => {
        if let Some(field) = fields.iter().find(|f| key_missing(&doc, f)) {
          return Err(
            Error::MissingKey { table: table.to_owned(), path: field.clone() }.into(),
          );
        }
      }
      KeyPath::Field(_) => {}
    }

    let key = self.store.put(table, doc).await?;
    debug!(table, %key, "saved document");
    Ok(key)
  }

  pub async fn delete(&self, table: &str, key: &Key) -> Result<bool, S::Error> {
    self.schema().require_table(table)?;
    self.store.delete(table, key).await
  }

  /// Delete a document along with the rows that refer to it.
  ///
  /// Runs as one transaction: either the root and every dependent change
  /// is applied, or nothing is. Returns whether the root existed.
  pub async fn delete_with_dependents(&self, table: &str, key: &Key) -> Result<bool, S::Error> {
    let schema = self.schema();
    schema.require_table(table)?;

    let mut plan: Vec<(Dependent, KeyPath)> = Vec::new();
    for dep in catalog::dependents(table) {
      // Skip dependents an older schema does not declare.
      if let Some(dep_schema) = schema.table(dep.table) {
        plan.push((*dep, dep_schema.primary_key.path.clone()));
      }
    }

    let mut scope: Vec<&str> = vec![table];
    scope.extend(plan.iter().map(|(dep, _)| dep.table));

    let root = table.to_owned();
    let key = key.clone();
    self
      .store
      .transaction(&scope, move |tx| {
        let existed = tx.delete(&root, &key)?;
        for (dep, pk_path) in &plan {
          let query = IndexQuery::new(dep.table, dep.field, Matcher::Equals(key.to_value()));
          let rows = tx.query(&query)?;
          match dep.action {
            DependentAction::Delete => {
              let keys: Vec<Key> = rows.iter().filter_map(|row| pk_path.extract(row)).collect();
              tx.bulk_delete(dep.table, &keys)?;
            }
            DependentAction::Nullify => {
              for mut row in rows {
                set_path(&mut row, dep.field, Value::Null);
                tx.put(dep.table, row)?;
              }
            }
          }
          debug!(root = %root, table = dep.table, action = ?dep.action, "applied dependent rule");
        }
        Ok(existed)
      })
      .await
  }

  // ── Reads ─────────────────────────────────────────────────────────────

  pub async fn get(&self, table: &str, key: &Key) -> Result<Option<Document>, S::Error> {
    self.store.get(table, key).await
  }

  pub fn query(
    &self,
    table: impl Into<String>,
    index: impl Into<String>,
    matcher: Matcher,
  ) -> Collection<'_, S> {
    self.store.query(table, index, matcher)
  }

  pub async fn all(&self, table: &str) -> Result<Vec<Document>, S::Error> {
    self.store.to_vec(table).await
  }

  // ── Settings ──────────────────────────────────────────────────────────

  /// The stored settings merged over defaults.
  pub async fn settings(&self) -> Result<Settings, S::Error> {
    let key = Key::from(SETTINGS_KEY);
    match self.store.get(catalog::SETTINGS, &key).await? {
      Some(doc) => Ok(Settings::from_document(doc)?),
      None => Ok(Settings::default()),
    }
  }

  pub async fn save_settings(&self, settings: &Settings) -> Result<(), S::Error> {
    self.save_data(catalog::SETTINGS, settings.to_document()?).await?;
    Ok(())
  }
}

fn key_missing(doc: &Document, field: &str) -> bool {
  match get_path(doc, field) {
    None | Some(Value::Null) => true,
    Some(Value::String(s)) => s.is_empty(),
    Some(_) => false,
  }
}

//! [`Notifier`]: the append-only notification log and its unread counter.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tahfeez_core::{
  IndexQuery, Key, LocalStore, Matcher, SchoolDb, StoreTx,
  catalog::NOTIFICATIONS,
  notification::{NewNotification, Notification},
};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const REFERENCE_INDEX: &str = "reference_id";
const READ_INDEX: &str = "is_read";

struct Inner<S> {
  db:     SchoolDb<S>,
  added:  broadcast::Sender<Notification>,
  unread: watch::Sender<usize>,
}

/// Handle to the notification log. Cloning shares the log and its
/// listeners.
pub struct Notifier<S> {
  inner: Arc<Inner<S>>,
}

impl<S> Clone for Notifier<S> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<S: LocalStore + 'static> Notifier<S> {
  /// Build a notifier and prime the unread counter from the store.
  pub async fn new(db: SchoolDb<S>) -> Result<Self> {
    let (added, _) = broadcast::channel(64);
    let (unread, _) = watch::channel(0);
    let notifier = Self { inner: Arc::new(Inner { db, added, unread }) };
    notifier.refresh().await?;
    Ok(notifier)
  }

  pub fn db(&self) -> &SchoolDb<S> { &self.inner.db }

  /// Newly appended notifications, as they are stored.
  pub fn subscribe(&self) -> broadcast::Receiver<Notification> { self.inner.added.subscribe() }

  pub fn unread_watch(&self) -> watch::Receiver<usize> { self.inner.unread.subscribe() }

  // ── Emit ──────────────────────────────────────────────────────────────

  pub async fn emit(&self, input: NewNotification) -> Result<Option<Notification>> {
    self.emit_at(input, Utc::now()).await
  }

  /// Append `input` unless a notification with the same reference key is
  /// already stored. Returns the stored notification, or `None` for a
  /// duplicate.
  pub async fn emit_at(
    &self,
    mut input: NewNotification,
    at: DateTime<Utc>,
  ) -> Result<Option<Notification>> {
    input.reference_key = input.reference_key.filter(|k| !k.is_empty());
    let mut record = Notification::unread(input, at);
    let doc = record.to_document()?;
    let reference = record.reference_key.clone();

    let stored = self
      .inner
      .db
      .store()
      .transaction(&[NOTIFICATIONS], move |tx| {
        if let Some(reference) = &reference
          && has_reference(tx, reference)?
        {
          return Ok(None);
        }
        tx.put(NOTIFICATIONS, doc).map(Some)
      })
      .await
      .map_err(Error::store)?;

    let Some(id) = stored else {
      debug!(reference = ?record.reference_key, "notification already recorded");
      return Ok(None);
    };
    record.id = Some(id);
    debug!(id = ?record.id, category = %record.category, "notification added");

    self.inner.added.send(record.clone()).ok();
    self.refresh().await?;
    Ok(Some(record))
  }

  // ── Read state ────────────────────────────────────────────────────────

  /// Mark one notification read. Returns whether it exists.
  pub async fn mark_read(&self, id: &Key) -> Result<bool> {
    let id = id.clone();
    let found = self
      .inner
      .db
      .store()
      .transaction(&[NOTIFICATIONS], move |tx| {
        let Some(mut doc) = tx.get(NOTIFICATIONS, &id)? else {
          return Ok(false);
        };
        doc.insert("is_read".to_owned(), Value::from(1));
        tx.put(NOTIFICATIONS, doc)?;
        Ok(true)
      })
      .await
      .map_err(Error::store)?;
    self.refresh().await?;
    Ok(found)
  }

  /// Mark every unread notification read. Returns how many changed.
  pub async fn mark_all_read(&self) -> Result<usize> {
    let changed = self
      .inner
      .db
      .store()
      .transaction(&[NOTIFICATIONS], |tx| {
        let unread = tx.query(&unread_query())?;
        let n = unread.len();
        for mut doc in unread {
          doc.insert("is_read".to_owned(), Value::from(1));
          tx.put(NOTIFICATIONS, doc)?;
        }
        Ok(n)
      })
      .await
      .map_err(Error::store)?;
    self.refresh().await?;
    Ok(changed)
  }

  pub async fn unread_count(&self) -> Result<usize> {
    self
      .inner
      .db
      .store()
      .count(&unread_query())
      .await
      .map_err(Error::store)
  }

  /// Recount unread notifications and publish the result. Call after the
  /// log changed behind the notifier's back, e.g. after a sync.
  pub async fn refresh(&self) -> Result<usize> {
    let n = self.unread_count().await?;
    self.inner.unread.send_replace(n);
    Ok(n)
  }

  // ── Listing ───────────────────────────────────────────────────────────

  /// Every notification, newest first.
  pub async fn list(&self) -> Result<Vec<Notification>> {
    let query = IndexQuery::all(NOTIFICATIONS);
    self.load(&query).await
  }

  pub async fn list_unread(&self) -> Result<Vec<Notification>> {
    self.load(&unread_query()).await
  }

  async fn load(&self, query: &IndexQuery) -> Result<Vec<Notification>> {
    let docs = self
      .inner
      .db
      .store()
      .scan(query)
      .await
      .map_err(Error::store)?;
    let mut out: Vec<Notification> = docs
      .into_iter()
      .filter_map(|doc| match Notification::from_document(doc) {
        Ok(n) => Some(n),
        Err(e) => {
          warn!(error = %e, "skipping malformed notification");
          None
        }
      })
      .collect();
    // Newest first; ids break ties between notifications of the same instant.
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
    Ok(out)
  }
}

/// `is_read` holds `0`/`1`. Remote rows may carry JSON booleans, which the
/// index reads as the same integers.
fn unread_query() -> IndexQuery { IndexQuery::new(NOTIFICATIONS, READ_INDEX, Matcher::equals(0)) }

fn has_reference(tx: &mut dyn StoreTx, reference: &str) -> tahfeez_core::Result<bool> {
  let query = IndexQuery::new(NOTIFICATIONS, REFERENCE_INDEX, Matcher::equals(reference)).limit(1);
  Ok(!tx.query(&query)?.is_empty())
}

//! [`SyncEngine`]: pulls the remote copy over the local store, remote wins.

use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tahfeez_core::{
  Document, LocalStore, SchoolDb, catalog,
  document::{get_path, set_path},
  schema::TableSchema,
};
use tokio::{
  sync::{Mutex, broadcast, watch},
  time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
  error::{Result, SyncError, Unavailable},
  remote::RemoteSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
  Idle,
  Syncing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
  Manual,
  Periodic,
}

impl fmt::Display for Trigger {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Trigger::Manual => "manual",
      Trigger::Periodic => "periodic",
    })
  }
}

/// Published after every successful cycle. Listeners should re-read
/// whatever they display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChanged {
  /// `(table, rows now stored)`, in sync order.
  pub tables: Vec<(String, usize)>,
  pub at:     DateTime<Utc>,
}

impl DataChanged {
  pub fn rows(&self) -> usize { self.tables.iter().map(|(_, n)| n).sum() }
}

struct Inner<S, R> {
  db:      SchoolDb<S>,
  remote:  R,
  tables:  Vec<String>,
  gate:    Mutex<()>,
  state:   watch::Sender<SyncState>,
  changes: broadcast::Sender<DataChanged>,
}

/// Replaces the local contents of every synced table with the remote's.
///
/// Cloning shares the engine; at most one cycle runs at a time across
/// clones.
pub struct SyncEngine<S, R> {
  inner: Arc<Inner<S, R>>,
}

impl<S, R> Clone for SyncEngine<S, R> {
  fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

/// Resets the published state when a cycle ends, however it ends.
struct Busy<'a>(&'a watch::Sender<SyncState>);

impl<'a> Busy<'a> {
  fn enter(state: &'a watch::Sender<SyncState>) -> Self {
    state.send_replace(SyncState::Syncing);
    Self(state)
  }
}

impl Drop for Busy<'_> {
  fn drop(&mut self) { self.0.send_replace(SyncState::Idle); }
}

impl<S, R> SyncEngine<S, R>
where
  S: LocalStore + 'static,
  R: RemoteSource + 'static,
{
  /// An engine over the default table list.
  pub fn new(db: SchoolDb<S>, remote: R) -> Self {
    let tables = catalog::SYNC_TABLES.iter().map(|t| (*t).to_owned()).collect();
    Self::with_tables(db, remote, tables)
  }

  pub fn with_tables(db: SchoolDb<S>, remote: R, tables: Vec<String>) -> Self {
    let (state, _) = watch::channel(SyncState::Idle);
    let (changes, _) = broadcast::channel(16);
    Self {
      inner: Arc::new(Inner {
        db,
        remote,
        tables,
        gate: Mutex::new(()),
        state,
        changes,
      }),
    }
  }

  pub fn tables(&self) -> &[String] { &self.inner.tables }

  pub fn remote(&self) -> &R { &self.inner.remote }

  pub fn status(&self) -> SyncState { *self.inner.state.borrow() }

  pub fn watch(&self) -> watch::Receiver<SyncState> { self.inner.state.subscribe() }

  pub fn subscribe(&self) -> broadcast::Receiver<DataChanged> { self.inner.changes.subscribe() }

  /// Run one cycle.
  ///
  /// Every snapshot is fetched before anything is written; the writes then
  /// happen in one transaction. A failure at any point leaves the store as
  /// it was.
  pub async fn sync(&self, trigger: Trigger) -> Result<DataChanged> {
    let inner = &*self.inner;
    let Ok(_gate) = inner.gate.try_lock() else {
      return Err(SyncError::AlreadyRunning);
    };

    if !inner.remote.is_configured() {
      return Err(Unavailable::NotConfigured.into());
    }
    for table in &inner.tables {
      inner.db.schema().require_table(table).map_err(SyncError::store)?;
    }
    if !inner.remote.is_reachable().await {
      return Err(Unavailable::Offline.into());
    }

    let _busy = Busy::enter(&inner.state);
    info!(%trigger, tables = inner.tables.len(), "sync started");

    let mut snapshots = Vec::with_capacity(inner.tables.len());
    for table in &inner.tables {
      let rows = inner
        .remote
        .fetch_table(table)
        .await
        .map_err(|source| SyncError::Fetch { table: table.clone(), source })?;
      debug!(table = %table, rows = rows.len(), "fetched snapshot");
      let schema = inner.db.schema().require_table(table).map_err(SyncError::store)?;
      snapshots.push((table.clone(), drop_unique_conflicts(table, schema, rows)));
    }

    let counts: Vec<(String, usize)> = snapshots
      .iter()
      .map(|(table, rows)| (table.clone(), rows.len()))
      .collect();
    let scope: Vec<&str> = inner.tables.iter().map(String::as_str).collect();
    inner
      .db
      .store()
      .transaction(&scope, move |tx| {
        for (table, rows) in snapshots {
          tx.clear(&table)?;
          tx.bulk_put(&table, rows)?;
        }
        Ok(())
      })
      .await
      .map_err(SyncError::store)?;

    let event = DataChanged { tables: counts, at: Utc::now() };
    info!(%trigger, rows = event.rows(), "sync completed");
    inner.changes.send(event.clone()).ok();
    Ok(event)
  }

  /// Sync every `period` until the task is dropped. Failures are logged,
  /// never returned.
  pub async fn run_periodic(&self, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      ticker.tick().await;
      match self.sync(Trigger::Periodic).await {
        Ok(_) => {}
        Err(SyncError::AlreadyRunning) => debug!("sync already running; skipping tick"),
        Err(SyncError::Unavailable(reason)) => debug!(%reason, "skipping sync"),
        Err(e) => warn!(error = %e, "automatic sync failed"),
      }
    }
  }
}

/// Rows that would collide on one of the table's unique indices. The first
/// row per value is kept. Blank strings on a unique path are stored as null,
/// and rows without the indexed value never collide.
fn drop_unique_conflicts(table: &str, schema: &TableSchema, mut rows: Vec<Document>) -> Vec<Document> {
  let unique: Vec<_> = schema.indices.iter().filter(|spec| spec.unique).collect();
  if unique.is_empty() {
    return rows;
  }
  for row in &mut rows {
    for field in unique.iter().flat_map(|spec| spec.path.fields()) {
      if get_path(row, field).is_some_and(|v| v.as_str() == Some("")) {
        set_path(row, field, Value::Null);
      }
    }
  }
  let mut seen = vec![HashSet::new(); unique.len()];
  let before = rows.len();
  let kept: Vec<Document> = rows
    .into_iter()
    .filter(|row| {
      let keys: Vec<_> = unique.iter().map(|spec| spec.path.extract(row)).collect();
      let clash = keys
        .iter()
        .zip(&seen)
        .any(|(key, seen)| key.as_ref().is_some_and(|k| seen.contains(k)));
      if clash {
        return false;
      }
      for (key, seen) in keys.into_iter().zip(seen.iter_mut()) {
        if let Some(key) = key {
          seen.insert(key);
        }
      }
      true
    })
    .collect();
  if kept.len() < before {
    warn!(table, dropped = before - kept.len(), "remote rows collide on a unique index");
  }
  kept
}

//! Sync engine tests against an in-memory store and a scripted remote.

use std::{
  collections::HashMap,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use serde_json::{Value, json};
use tahfeez_core::{Document, LocalStore, SchoolDb, catalog};
use tahfeez_store_sqlite::SqliteStore;
use tokio::sync::Semaphore;

use crate::{RemoteError, RemoteSource, SyncEngine, SyncError, SyncState, Trigger, Unavailable};

fn doc(value: Value) -> Document {
  match value {
    Value::Object(map) => map,
    other => panic!("not an object: {other}"),
  }
}

#[derive(Default)]
struct FakeRemote {
  tables:       HashMap<String, Vec<Document>>,
  unconfigured: bool,
  offline:      bool,
  fail_on:      Option<&'static str>,
  /// Fetches wait for a permit when set.
  gate:         Option<Arc<Semaphore>>,
  fetches:      AtomicUsize,
}

impl FakeRemote {
  fn with_table(mut self, table: &str, rows: Vec<Value>) -> Self {
    self.tables.insert(table.to_owned(), rows.into_iter().map(doc).collect());
    self
  }
}

impl RemoteSource for FakeRemote {
  fn is_configured(&self) -> bool { !self.unconfigured }

  async fn is_reachable(&self) -> bool { !self.offline }

  async fn fetch_table(&self, table: &str) -> Result<Vec<Document>, RemoteError> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    if let Some(gate) = &self.gate {
      let _permit = gate.acquire().await.expect("gate closed");
    }
    if self.fail_on == Some(table) {
      return Err(RemoteError::Status { table: table.to_owned(), status: 503 });
    }
    Ok(self.tables.get(table).cloned().unwrap_or_default())
  }
}

async fn seeded_db() -> SchoolDb<SqliteStore> {
  let db = SchoolDb::new(SqliteStore::open_in_memory().await.unwrap());
  for i in 1..=5 {
    db.save_data(catalog::STUDENTS, doc(json!({ "id": format!("local-{i}"), "name": "local" })))
      .await
      .unwrap();
  }
  db.save_data(catalog::CLASSES, doc(json!({ "id": "c1", "name": "local class" })))
    .await
    .unwrap();
  db
}

fn remote_students() -> FakeRemote {
  FakeRemote::default().with_table(
    catalog::STUDENTS,
    vec![
      json!({ "id": "r1", "name": "Ahmed" }),
      json!({ "id": "r2", "name": "Bilal" }),
      json!({ "id": "r3", "name": "Hamza" }),
    ],
  )
}

async fn student_ids(db: &SchoolDb<SqliteStore>) -> Vec<String> {
  db.all(catalog::STUDENTS)
    .await
    .unwrap()
    .iter()
    .map(|d| d["id"].as_str().unwrap().to_owned())
    .collect()
}

// ─── Cycles ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn remote_snapshot_replaces_local_rows() {
  let db = seeded_db().await;
  let engine = SyncEngine::new(db.clone(), remote_students());
  let mut changes = engine.subscribe();

  let event = engine.sync(Trigger::Manual).await.unwrap();

  assert_eq!(student_ids(&db).await, ["r1", "r2", "r3"]);
  // Tables the remote has no rows for are emptied too.
  assert!(db.all(catalog::CLASSES).await.unwrap().is_empty());
  assert_eq!(event.rows(), 3);
  assert_eq!(event.tables.len(), catalog::SYNC_TABLES.len());
  assert_eq!(changes.recv().await.unwrap(), event);
  assert_eq!(engine.status(), SyncState::Idle);
}

#[tokio::test]
async fn failed_fetch_leaves_store_untouched() {
  let db = seeded_db().await;
  let remote = FakeRemote { fail_on: Some(catalog::EXAMS), ..remote_students() };
  let engine = SyncEngine::new(db.clone(), remote);

  let err = engine.sync(Trigger::Manual).await.unwrap_err();
  assert!(matches!(err, SyncError::Fetch { ref table, .. } if table == "exams"));
  assert_eq!(student_ids(&db).await.len(), 5);
  assert_eq!(db.all(catalog::CLASSES).await.unwrap().len(), 1);
  assert_eq!(engine.status(), SyncState::Idle);
}

#[tokio::test]
async fn failed_write_rolls_back_every_table() {
  let db = seeded_db().await;
  // Settings rows are keyed by `key`; this one has none.
  let remote = remote_students().with_table(catalog::SETTINGS, vec![json!({ "appName": "x" })]);
  let engine = SyncEngine::new(db.clone(), remote);

  let err = engine.sync(Trigger::Manual).await.unwrap_err();
  assert!(matches!(err, SyncError::Store(_)));
  assert_eq!(student_ids(&db).await.len(), 5);
  assert_eq!(db.all(catalog::CLASSES).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unavailable_remote_is_not_contacted() {
  let db = seeded_db().await;

  let engine = SyncEngine::new(db.clone(), FakeRemote { unconfigured: true, ..remote_students() });
  let err = engine.sync(Trigger::Manual).await.unwrap_err();
  assert!(matches!(err, SyncError::Unavailable(Unavailable::NotConfigured)));
  assert_eq!(engine.remote().fetches.load(Ordering::SeqCst), 0);

  let offline = SyncEngine::new(db.clone(), FakeRemote { offline: true, ..remote_students() });
  let err = offline.sync(Trigger::Manual).await.unwrap_err();
  assert!(matches!(err, SyncError::Unavailable(Unavailable::Offline)));
  assert_eq!(offline.remote().fetches.load(Ordering::SeqCst), 0);

  assert_eq!(student_ids(&db).await.len(), 5);
}

#[tokio::test]
async fn unknown_sync_table_fails_before_fetching() {
  let db = seeded_db().await;
  let engine = SyncEngine::with_tables(
    db.clone(),
    remote_students(),
    vec![catalog::STUDENTS.to_owned(), "guardians".to_owned()],
  );

  let err = engine.sync(Trigger::Manual).await.unwrap_err();
  assert!(matches!(err, SyncError::Store(_)));
  assert_eq!(engine.remote().fetches.load(Ordering::SeqCst), 0);
  assert_eq!(student_ids(&db).await.len(), 5);
}

#[tokio::test]
async fn request_while_syncing_is_rejected() {
  let db = seeded_db().await;
  let gate = Arc::new(Semaphore::new(0));
  let remote = FakeRemote { gate: Some(Arc::clone(&gate)), ..remote_students() };
  let engine = SyncEngine::new(db.clone(), remote);

  let mut status = engine.watch();
  let running = tokio::spawn({
    let engine = engine.clone();
    async move { engine.sync(Trigger::Periodic).await }
  });
  status
    .wait_for(|s| *s == SyncState::Syncing)
    .await
    .unwrap();

  let second = engine.sync(Trigger::Manual).await.unwrap_err();
  assert!(matches!(second, SyncError::AlreadyRunning));
  assert_eq!(engine.remote().fetches.load(Ordering::SeqCst), 1);
  // The rejected request did not touch the store.
  assert_eq!(student_ids(&db).await.len(), 5);

  gate.add_permits(Semaphore::MAX_PERMITS);
  running.await.unwrap().unwrap();
  assert_eq!(student_ids(&db).await, ["r1", "r2", "r3"]);
  assert_eq!(engine.status(), SyncState::Idle);
}

#[tokio::test]
async fn store_reads_see_the_new_snapshot_immediately() {
  let db = seeded_db().await;
  let engine = SyncEngine::new(db.clone(), remote_students());
  engine.sync(Trigger::Manual).await.unwrap();

  let ahmed = db
    .query(catalog::STUDENTS, "name", tahfeez_core::Matcher::equals("Ahmed"))
    .first()
    .await
    .unwrap();
  assert!(ahmed.is_some());
  assert_eq!(db.store().to_vec(catalog::STUDENTS).await.unwrap().len(), 3);
}

#[tokio::test]
async fn colliding_remote_references_keep_the_first_row() {
  let db = seeded_db().await;
  let remote = remote_students().with_table(
    catalog::NOTIFICATIONS,
    vec![
      json!({ "id": 1, "message": "a", "is_read": 0, "reference_id": "salary-prep-2025-03" }),
      json!({ "id": 2, "message": "b", "is_read": 0, "reference_id": "salary-prep-2025-03" }),
      json!({ "id": 3, "message": "c", "is_read": 1, "reference_id": null }),
      json!({ "id": 4, "message": "d", "is_read": 1, "reference_id": null }),
    ],
  );
  let engine = SyncEngine::new(db.clone(), remote);

  let event = engine.sync(Trigger::Manual).await.unwrap();
  let ids: Vec<i64> = db
    .all(catalog::NOTIFICATIONS)
    .await
    .unwrap()
    .iter()
    .map(|d| d["id"].as_i64().unwrap())
    .collect();
  assert_eq!(ids, [1, 3, 4]);
  assert!(event.tables.contains(&(catalog::NOTIFICATIONS.to_owned(), 3)));
}

#[tokio::test]
async fn blank_remote_references_are_stored_as_null() {
  let db = seeded_db().await;
  let remote = remote_students().with_table(
    catalog::NOTIFICATIONS,
    vec![
      json!({ "id": 1, "message": "a", "is_read": 0, "reference_id": "" }),
      json!({ "id": 2, "message": "b", "is_read": 0, "reference_id": "" }),
    ],
  );
  let engine = SyncEngine::new(db.clone(), remote);

  engine.sync(Trigger::Manual).await.unwrap();

  assert_eq!(student_ids(&db).await, ["r1", "r2", "r3"]);
  let notes = db.all(catalog::NOTIFICATIONS).await.unwrap();
  assert_eq!(notes.len(), 2);
  assert!(notes.iter().all(|n| n["reference_id"].is_null()));
}

//! The migration runner.
//!
//! Brings a database file from the version recorded in `PRAGMA
//! user_version` up to the newest version of a [`SchemaLadder`], one
//! version per transaction.

use std::collections::BTreeMap;

use rusqlite::{Connection, Transaction, TransactionBehavior, params};
use tahfeez_core::{SchemaLadder, SchemaVersion, schema::TableSchema};
use tracing::{debug, info};

use crate::{
  Error, Result,
  encode::{decode_body, index_ddl, index_name, table_ident},
  schema::BOOTSTRAP,
  tx::SqliteTx,
};

/// What one run of the migration runner did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
  pub from:    u32,
  pub to:      u32,
  pub applied: Vec<u32>,
}

impl MigrationReport {
  pub fn is_noop(&self) -> bool { self.applied.is_empty() }
}

pub fn user_version(conn: &Connection) -> rusqlite::Result<u32> {
  conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Apply every pending version of `ladder`, oldest first.
///
/// Stops at the first failure. Versions applied before it stay applied;
/// the failing one is rolled back entirely.
pub fn run(conn: &mut Connection, ladder: &SchemaLadder) -> Result<MigrationReport> {
  conn.execute_batch(BOOTSTRAP)?;

  let from = user_version(conn)?;
  let known = ladder.max_version();
  if from > known {
    return Err(Error::FutureVersion { disk: from, known });
  }

  let mut applied = Vec::new();
  for version in ladder.pending(from) {
    apply(conn, version).map_err(|e| Error::Migration {
      version: version.version,
      reason:  e.to_string(),
    })?;
    info!(version = version.version, "applied schema version");
    applied.push(version.version);
  }

  if applied.is_empty() {
    debug!(version = from, "schema is current");
  }
  let to = applied.last().copied().unwrap_or(from);
  Ok(MigrationReport { from, to, applied })
}

fn apply(conn: &mut Connection, version: &SchemaVersion) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let built = built_tables(&tx)?;

  for name in built.keys() {
    if version.table(name).is_none() {
      drop_table(&tx, name)?;
    }
  }
  for (name, schema) in &version.tables {
    let descriptor = schema.primary_key.to_string();
    match built.get(name) {
      None => create_table(&tx, name, &descriptor)?,
      Some(old) if *old != descriptor => rebuild_table(&tx, version, name, old, &descriptor)?,
      Some(_) => {}
    }
  }

  for (name, schema) in &version.tables {
    drop_stale_indices(&tx, name, schema)?;
  }

  if let Some(upgrade) = version.upgrade() {
    let mut handle = SqliteTx::new(&tx, version, None);
    upgrade(&mut handle)?;
  }

  // Unique indices go last so the transform can repair duplicates first.
  for (name, schema) in &version.tables {
    for spec in &schema.indices {
      if let Some(ddl) = index_ddl(name, spec) {
        tx.execute_batch(&ddl)?;
      }
    }
  }

  tx.pragma_update(None, "user_version", version.version)?;
  tx.commit()?;
  Ok(())
}

/// Table name → primary key descriptor, as currently built on disk.
fn built_tables(tx: &Transaction<'_>) -> Result<BTreeMap<String, String>> {
  let mut stmt = tx.prepare("SELECT tbl, primary_key FROM _tables")?;
  let rows = stmt
    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
  Ok(rows)
}

fn create_table(tx: &Transaction<'_>, name: &str, descriptor: &str) -> Result<()> {
  tx.execute_batch(&format!(
    "CREATE TABLE IF NOT EXISTS {} (pk PRIMARY KEY NOT NULL, body TEXT NOT NULL)",
    table_ident(name)
  ))?;
  tx.execute(
    "INSERT INTO _tables (tbl, primary_key) VALUES (?1, ?2)
     ON CONFLICT (tbl) DO UPDATE SET primary_key = excluded.primary_key",
    params![name, descriptor],
  )?;
  debug!(table = name, primary_key = descriptor, "created table");
  Ok(())
}

fn drop_table(tx: &Transaction<'_>, name: &str) -> Result<()> {
  tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", table_ident(name)))?;
  tx.execute("DELETE FROM _tables WHERE tbl = ?1", params![name])?;
  tx.execute("DELETE FROM _sequences WHERE tbl = ?1", params![name])?;
  info!(table = name, "dropped table");
  Ok(())
}

/// Re-key every document of `name` under a new primary key declaration.
/// Auto-increment keys are assigned afresh to documents that have none.
fn rebuild_table(
  tx: &Transaction<'_>,
  version: &SchemaVersion,
  name: &str,
  old: &str,
  descriptor: &str,
) -> Result<()> {
  let ident = table_ident(name);
  let bodies: Vec<String> = {
    let mut stmt = tx.prepare(&format!("SELECT body FROM {ident} ORDER BY pk"))?;
    stmt
      .query_map([], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?
  };

  tx.execute_batch(&format!("DROP TABLE {ident}"))?;
  tx.execute("DELETE FROM _sequences WHERE tbl = ?1", params![name])?;
  create_table(tx, name, descriptor)?;

  let mut handle = SqliteTx::new(tx, version, None);
  for body in &bodies {
    handle.insert_new(name, decode_body(body)?)?;
  }
  info!(table = name, from = old, to = descriptor, rows = bodies.len(), "rebuilt table");
  Ok(())
}

fn drop_stale_indices(tx: &Transaction<'_>, name: &str, schema: &TableSchema) -> Result<()> {
  let wanted: Vec<String> = schema
    .indices
    .iter()
    .filter(|spec| !spec.multi_entry)
    .map(|spec| index_name(name, spec))
    .collect();

  let present: Vec<String> = {
    let mut stmt = tx.prepare(
      "SELECT name FROM sqlite_master
       WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL",
    )?;
    stmt
      .query_map(params![format!("t_{name}")], |row| row.get(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?
  };

  for index in present.iter().filter(|i| !wanted.contains(i)) {
    tx.execute_batch(&format!("DROP INDEX \"{index}\""))?;
    debug!(table = name, index = %index, "dropped index");
  }
  Ok(())
}

//! [`SqliteTx`]: the [`StoreTx`] handle over one open connection or
//! transaction.

use rusqlite::{Connection, ErrorCode, OptionalExtension as _, params, params_from_iter};
use serde_json::Value;
use tahfeez_core::{
  Document, Error, IndexQuery, Key, SchemaVersion, StoreTx,
  document::set_path,
  schema::{KeyPath, TableSchema},
};

use crate::encode::{decode_body, encode_body, key_to_sql, plan, table_ident};

type CoreResult<T> = tahfeez_core::Result<T>;

pub struct SqliteTx<'c> {
  conn:   &'c Connection,
  schema: &'c SchemaVersion,
  /// Tables this handle may touch; `None` allows every table of `schema`.
  scope:  Option<Vec<String>>,
}

impl<'c> SqliteTx<'c> {
  pub fn new(conn: &'c Connection, schema: &'c SchemaVersion, scope: Option<Vec<String>>) -> Self {
    Self { conn, schema, scope }
  }

  fn table(&self, table: &str) -> CoreResult<&'c TableSchema> {
    let schema = self.schema.require_table(table)?;
    if let Some(scope) = &self.scope
      && !scope.iter().any(|t| t == table)
    {
      return Err(Error::TableNotInScope(table.to_owned()));
    }
    Ok(schema)
  }

  /// Next auto-increment value for `table`. Never hands out a value twice,
  /// clears included.
  fn next_sequence(&self, table: &str) -> CoreResult<i64> {
    self
      .conn
      .query_row(
        "INSERT INTO _sequences (tbl, last) VALUES (?1, 1)
         ON CONFLICT (tbl) DO UPDATE SET last = last + 1
         RETURNING last",
        params![table],
        |row| row.get(0),
      )
      .map_err(Error::backend)
  }

  /// Raise the high-water mark to cover an explicitly supplied key.
  fn bump_sequence(&self, table: &str, at_least: i64) -> CoreResult<()> {
    self
      .conn
      .execute(
        "INSERT INTO _sequences (tbl, last) VALUES (?1, ?2)
         ON CONFLICT (tbl) DO UPDATE SET last = max(last, excluded.last)",
        params![table, at_least],
      )
      .map_err(Error::backend)?;
    Ok(())
  }

  /// Resolve the key `doc` will be stored under, assigning one for
  /// auto-increment tables.
  fn assign_key(&self, table: &str, schema: &TableSchema, doc: &mut Document) -> CoreResult<Key> {
    let pk = &schema.primary_key;
    match (pk.path.extract(doc), &pk.path) {
      (Some(key), _) => {
        if pk.auto_increment
          && let Key::Int(n) = &key
        {
          self.bump_sequence(table, *n)?;
        }
        Ok(key)
      }
      (None, KeyPath::Field(field)) if pk.auto_increment => {
        let next = self.next_sequence(table)?;
        set_path(doc, field, Value::from(next));
        Ok(Key::Int(next))
      }
      (None, path) => Err(Error::MissingKey { table: table.to_owned(), path: path.to_string() }),
    }
  }

  /// Insert without overwriting; an existing key is a constraint error.
  pub fn insert_new(&mut self, table: &str, mut doc: Document) -> CoreResult<Key> {
    let schema = self.table(table)?;
    let key = self.assign_key(table, schema, &mut doc)?;
    let sql = format!("INSERT INTO {} (pk, body) VALUES (?1, ?2)", table_ident(table));
    self
      .conn
      .execute(&sql, params![key_to_sql(&key), encode_body(&doc)?])
      .map_err(|e| constraint_or_backend(table, e))?;
    Ok(key)
  }
}

impl StoreTx for SqliteTx<'_> {
  fn get(&mut self, table: &str, key: &Key) -> CoreResult<Option<Document>> {
    self.table(table)?;
    let sql = format!("SELECT body FROM {} WHERE pk = ?1", table_ident(table));
    let body: Option<String> = self
      .conn
      .query_row(&sql, params![key_to_sql(key)], |row| row.get(0))
      .optional()
      .map_err(Error::backend)?;
    body.as_deref().map(decode_body).transpose()
  }

  fn query(&mut self, query: &IndexQuery) -> CoreResult<Vec<Document>> {
    let schema = self.table(&query.table)?;
    let plan = plan(schema, query)?;
    let mut stmt = self.conn.prepare(&plan.select_sql()).map_err(Error::backend)?;
    let bodies = stmt
      .query_map(params_from_iter(plan.params.iter()), |row| row.get::<_, String>(0))
      .map_err(Error::backend)?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(Error::backend)?;
    bodies.iter().map(|b| decode_body(b)).collect()
  }

  fn count(&mut self, query: &IndexQuery) -> CoreResult<usize> {
    let schema = self.table(&query.table)?;
    let plan = plan(schema, query)?;
    let n: i64 = self
      .conn
      .query_row(&plan.count_sql(), params_from_iter(plan.params.iter()), |row| row.get(0))
      .map_err(Error::backend)?;
    Ok(n as usize)
  }

  fn put(&mut self, table: &str, mut doc: Document) -> CoreResult<Key> {
    let schema = self.table(table)?;
    let key = self.assign_key(table, schema, &mut doc)?;
    let sql = format!(
      "INSERT INTO {} (pk, body) VALUES (?1, ?2)
       ON CONFLICT (pk) DO UPDATE SET body = excluded.body",
      table_ident(table)
    );
    self
      .conn
      .execute(&sql, params![key_to_sql(&key), encode_body(&doc)?])
      .map_err(|e| constraint_or_backend(table, e))?;
    Ok(key)
  }

  fn delete(&mut self, table: &str, key: &Key) -> CoreResult<bool> {
    self.table(table)?;
    let sql = format!("DELETE FROM {} WHERE pk = ?1", table_ident(table));
    let n = self
      .conn
      .execute(&sql, params![key_to_sql(key)])
      .map_err(Error::backend)?;
    Ok(n > 0)
  }

  fn clear(&mut self, table: &str) -> CoreResult<usize> {
    self.table(table)?;
    let sql = format!("DELETE FROM {}", table_ident(table));
    self.conn.execute(&sql, []).map_err(Error::backend)
  }

  fn modify(&mut self, table: &str, f: &mut dyn FnMut(&mut Document) -> bool) -> CoreResult<usize> {
    self.table(table)?;
    let ident = table_ident(table);
    let rows: Vec<(rusqlite::types::Value, String)> = {
      let mut stmt = self
        .conn
        .prepare(&format!("SELECT pk, body FROM {ident} ORDER BY pk"))
        .map_err(Error::backend)?;
      stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(Error::backend)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(Error::backend)?
    };

    let update = format!("UPDATE {ident} SET body = ?2 WHERE pk = ?1");
    let mut changed = 0;
    for (pk, body) in rows {
      let mut doc = decode_body(&body)?;
      if f(&mut doc) {
        self
          .conn
          .execute(&update, params![pk, encode_body(&doc)?])
          .map_err(|e| constraint_or_backend(table, e))?;
        changed += 1;
      }
    }
    Ok(changed)
  }
}

fn constraint_or_backend(table: &str, err: rusqlite::Error) -> Error {
  match &err {
    rusqlite::Error::SqliteFailure(failure, message)
      if failure.code == ErrorCode::ConstraintViolation =>
    {
      Error::Constraint {
        table:  table.to_owned(),
        reason: message.clone().unwrap_or_else(|| failure.to_string()),
      }
    }
    _ => Error::backend(err),
  }
}

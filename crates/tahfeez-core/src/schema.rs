//! Table schemas and the descriptor notation they are declared in.
//!
//! A descriptor is a comma-separated list. The first entry is the primary
//! key, the rest are secondary indices:
//!
//! | entry     | meaning                                         |
//! |-----------|-------------------------------------------------|
//! | `id`      | inline primary key / plain index on `id`        |
//! | `++id`    | auto-incremented integer primary key            |
//! | `[a+b]`   | compound key path                               |
//! | `*tags`   | multi-valued index over the elements of `tags`  |
//! | `&ref`    | unique index                                    |
//!
//! e.g. `"++id, [student_id+date], date"`.

use std::fmt;

use crate::{
  Error, Result,
  document::{Document, Key, get_path},
};

// ─── Key paths ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPath {
  Field(String),
  Compound(Vec<String>),
}

impl KeyPath {
  fn parse(raw: &str) -> Result<Self> {
    if let Some(inner) = raw.strip_prefix('[') {
      let inner = inner
        .strip_suffix(']')
        .ok_or_else(|| Error::InvalidSchema(format!("unterminated compound path {raw:?}")))?;
      let fields = inner
        .split('+')
        .map(|f| validate_field(f.trim()).map(str::to_owned))
        .collect::<Result<Vec<_>>>()?;
      if fields.len() < 2 {
        return Err(Error::InvalidSchema(format!(
          "compound path {raw:?} needs at least two fields"
        )));
      }
      Ok(KeyPath::Compound(fields))
    } else {
      Ok(KeyPath::Field(validate_field(raw)?.to_owned()))
    }
  }

  pub fn fields(&self) -> &[String] {
    match self {
      KeyPath::Field(f) => std::slice::from_ref(f),
      KeyPath::Compound(fields) => fields,
    }
  }

  pub fn is_compound(&self) -> bool { matches!(self, KeyPath::Compound(_)) }

  /// Extract the key at this path. `None` when any component is absent.
  pub fn extract(&self, doc: &Document) -> Option<Key> {
    match self {
      KeyPath::Field(f) => get_path(doc, f).and_then(Key::from_value),
      KeyPath::Compound(fields) => fields
        .iter()
        .map(|f| get_path(doc, f).and_then(Key::from_value))
        .collect::<Option<Vec<_>>>()
        .map(Key::Compound),
    }
  }
}

impl fmt::Display for KeyPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeyPath::Field(field) => f.write_str(field),
      KeyPath::Compound(fields) => write!(f, "[{}]", fields.join("+")),
    }
  }
}

fn validate_field(field: &str) -> Result<&str> {
  let valid = !field.is_empty()
    && field.split('.').all(|segment| {
      !segment.is_empty()
        && segment
          .chars()
          .all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
  if valid {
    Ok(field)
  } else {
    Err(Error::InvalidSchema(format!("invalid field path {field:?}")))
  }
}

// ─── Keys and indices ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKey {
  pub path:           KeyPath,
  pub auto_increment: bool,
}

impl fmt::Display for PrimaryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.auto_increment {
      f.write_str("++")?;
    }
    write!(f, "{}", self.path)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
  pub path:        KeyPath,
  pub multi_entry: bool,
  pub unique:      bool,
}

impl IndexSpec {
  /// The name queries use to address this index (`"date"`, `"[a+b]"`).
  pub fn name(&self) -> String { self.path.to_string() }
}

impl fmt::Display for IndexSpec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.unique {
      f.write_str("&")?;
    }
    if self.multi_entry {
      f.write_str("*")?;
    }
    write!(f, "{}", self.path)
  }
}

/// What an index name resolves to within a table.
#[derive(Debug, Clone, Copy)]
pub enum IndexTarget<'a> {
  Primary(&'a PrimaryKey),
  Secondary(&'a IndexSpec),
}

// ─── Table schema ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
  pub primary_key: PrimaryKey,
  pub indices:     Vec<IndexSpec>,
}

impl TableSchema {
  /// Parse a descriptor such as `"id, class_id, name, *tags"`.
  pub fn parse(descriptor: &str) -> Result<Self> {
    let mut entries = descriptor.split(',').map(str::trim);

    let first = entries
      .next()
      .filter(|e| !e.is_empty())
      .ok_or_else(|| Error::InvalidSchema("empty table descriptor".into()))?;
    let primary_key = match first.strip_prefix("++") {
      Some(rest) => {
        let path = KeyPath::parse(rest)?;
        if path.is_compound() {
          return Err(Error::InvalidSchema(format!(
            "auto-increment key {first:?} cannot be compound"
          )));
        }
        PrimaryKey { path, auto_increment: true }
      }
      None => PrimaryKey {
        path:           KeyPath::parse(first.trim_start_matches('&'))?,
        auto_increment: false,
      },
    };

    let mut indices: Vec<IndexSpec> = Vec::new();
    for entry in entries {
      if entry.is_empty() {
        return Err(Error::InvalidSchema(format!(
          "empty index entry in {descriptor:?}"
        )));
      }
      let mut rest = entry;
      let mut unique = false;
      let mut multi_entry = false;
      loop {
        if let Some(r) = rest.strip_prefix('&') {
          unique = true;
          rest = r;
        } else if let Some(r) = rest.strip_prefix('*') {
          multi_entry = true;
          rest = r;
        } else {
          break;
        }
      }
      let path = KeyPath::parse(rest)?;
      if multi_entry && path.is_compound() {
        return Err(Error::InvalidSchema(format!(
          "multi-valued index {entry:?} cannot be compound"
        )));
      }
      if multi_entry && unique {
        return Err(Error::InvalidSchema(format!(
          "multi-valued index {entry:?} cannot be unique"
        )));
      }
      let spec = IndexSpec { path, multi_entry, unique };
      if spec.path == primary_key.path
        || indices.iter().any(|existing| existing.path == spec.path)
      {
        return Err(Error::InvalidSchema(format!(
          "index {} declared twice in {descriptor:?}",
          spec.path
        )));
      }
      indices.push(spec);
    }

    Ok(Self { primary_key, indices })
  }

  /// Resolve an index name. `None` and the primary key's own name both
  /// address the primary key.
  pub fn resolve_index(&self, name: Option<&str>) -> Option<IndexTarget<'_>> {
    match name {
      None => Some(IndexTarget::Primary(&self.primary_key)),
      Some(n) if n == self.primary_key.path.to_string() => {
        Some(IndexTarget::Primary(&self.primary_key))
      }
      Some(n) => self
        .indices
        .iter()
        .find(|spec| spec.name() == n)
        .map(IndexTarget::Secondary),
    }
  }

  pub fn index(&self, name: &str) -> Option<&IndexSpec> {
    self.indices.iter().find(|spec| spec.name() == name)
  }
}

impl fmt::Display for TableSchema {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.primary_key)?;
    for index in &self.indices {
      write!(f, ", {index}")?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_every_entry_kind() {
    let schema = TableSchema::parse("++id, [student_id+date], *schedule_days, &reference_id, date").unwrap();
    assert!(schema.primary_key.auto_increment);
    assert_eq!(schema.primary_key.path, KeyPath::Field("id".into()));
    assert_eq!(schema.indices.len(), 4);
    assert_eq!(
      schema.indices[0].path,
      KeyPath::Compound(vec!["student_id".into(), "date".into()])
    );
    assert!(schema.indices[1].multi_entry);
    assert!(schema.indices[2].unique);
    assert_eq!(
      schema.to_string(),
      "++id, [student_id+date], *schedule_days, &reference_id, date"
    );
  }

  #[test]
  fn compound_primary_key() {
    let schema = TableSchema::parse("[student_id+sura+page], student_id").unwrap();
    assert!(!schema.primary_key.auto_increment);
    assert_eq!(schema.primary_key.path.fields().len(), 3);
    assert!(matches!(
      schema.resolve_index(Some("[student_id+sura+page]")),
      Some(IndexTarget::Primary(_))
    ));
  }

  #[test]
  fn resolves_indices_by_name() {
    let schema = TableSchema::parse("id, class_id, name").unwrap();
    assert!(matches!(schema.resolve_index(None), Some(IndexTarget::Primary(_))));
    assert!(matches!(schema.resolve_index(Some("id")), Some(IndexTarget::Primary(_))));
    assert!(matches!(
      schema.resolve_index(Some("class_id")),
      Some(IndexTarget::Secondary(_))
    ));
    assert!(schema.resolve_index(Some("fee")).is_none());
  }

  #[test]
  fn rejects_malformed_descriptors() {
    for bad in [
      "",
      "id,",
      "++[a+b]",
      "id, *[a+b]",
      "id, [a]",
      "id, name, name",
      "id, na-me",
      "id, [a+b",
      "id, &*tags",
    ] {
      assert!(TableSchema::parse(bad).is_err(), "{bad:?} should be rejected");
    }
  }
}

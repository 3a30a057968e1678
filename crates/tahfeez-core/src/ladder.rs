//! The schema ladder: an ordered list of schema versions.
//!
//! Each version declares the full shape of every table at that version and
//! optionally an upgrade transform run when a store moves from the previous
//! version to this one. Tables missing from a version are dropped by it.

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{Error, Result, schema::TableSchema, store::StoreTx};

/// Rewrites existing documents when upgrading into a version.
///
/// Runs synchronously inside the version's migration transaction. Must be
/// safe to re-run on rows it has already migrated.
pub type Upgrade = Arc<dyn Fn(&mut dyn StoreTx) -> Result<()> + Send + Sync>;

// ─── Declaration ─────────────────────────────────────────────────────────────

/// Unvalidated declaration of one version, as written in the catalog.
pub struct VersionDecl {
  version: u32,
  tables:  Vec<(String, String)>,
  upgrade: Option<Upgrade>,
}

impl VersionDecl {
  pub fn new(version: u32) -> Self {
    Self { version, tables: Vec::new(), upgrade: None }
  }

  pub fn table(mut self, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
    self.tables.push((name.into(), descriptor.into()));
    self
  }

  pub fn upgrade<F>(mut self, transform: F) -> Self
  where
    F: Fn(&mut dyn StoreTx) -> Result<()> + Send + Sync + 'static,
  {
    self.upgrade = Some(Arc::new(transform));
    self
  }
}

// ─── Validated version ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SchemaVersion {
  pub version: u32,
  pub tables:  BTreeMap<String, TableSchema>,
  upgrade:     Option<Upgrade>,
}

impl SchemaVersion {
  pub fn table(&self, name: &str) -> Option<&TableSchema> { self.tables.get(name) }

  /// Look a table up, failing with [`Error::UnknownTable`].
  pub fn require_table(&self, name: &str) -> Result<&TableSchema> {
    self
      .tables
      .get(name)
      .ok_or_else(|| Error::UnknownTable(name.to_owned()))
  }

  pub fn upgrade(&self) -> Option<&Upgrade> { self.upgrade.as_ref() }

  pub fn table_names(&self) -> impl Iterator<Item = &str> {
    self.tables.keys().map(String::as_str)
  }
}

impl fmt::Debug for SchemaVersion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchemaVersion")
      .field("version", &self.version)
      .field("tables", &self.tables)
      .field("upgrade", &self.upgrade.is_some())
      .finish()
  }
}

// ─── Ladder ──────────────────────────────────────────────────────────────────

/// Strictly ascending, non-empty sequence of schema versions.
///
/// Cloning is cheap; the versions are reference-counted.
#[derive(Clone, Debug)]
pub struct SchemaLadder {
  versions: Arc<[SchemaVersion]>,
}

impl SchemaLadder {
  pub fn new(decls: Vec<VersionDecl>) -> Result<Self> {
    if decls.is_empty() {
      return Err(Error::InvalidSchema("schema ladder has no versions".into()));
    }

    let mut versions = Vec::with_capacity(decls.len());
    let mut previous = 0;
    for decl in decls {
      if decl.version <= previous {
        return Err(Error::InvalidSchema(format!(
          "version {} declared after version {previous}",
          decl.version
        )));
      }
      previous = decl.version;

      let mut tables = BTreeMap::new();
      for (name, descriptor) in decl.tables {
        validate_table_name(&name)?;
        let schema = TableSchema::parse(&descriptor).map_err(|e| {
          Error::InvalidSchema(format!("v{} table {name:?}: {e}", decl.version))
        })?;
        if tables.insert(name.clone(), schema).is_some() {
          return Err(Error::InvalidSchema(format!(
            "v{} declares table {name:?} twice",
            decl.version
          )));
        }
      }

      versions.push(SchemaVersion {
        version: decl.version,
        tables,
        upgrade: decl.upgrade,
      });
    }

    Ok(Self { versions: versions.into() })
  }

  /// The newest declared version; the shape every open store ends up in.
  pub fn latest(&self) -> &SchemaVersion {
    // Non-empty by construction.
    &self.versions[self.versions.len() - 1]
  }

  pub fn max_version(&self) -> u32 { self.latest().version }

  pub fn version(&self, version: u32) -> Option<&SchemaVersion> {
    self.versions.iter().find(|v| v.version == version)
  }

  /// Versions strictly newer than `from`, ascending.
  pub fn pending(&self, from: u32) -> impl Iterator<Item = &SchemaVersion> {
    self.versions.iter().filter(move |v| v.version > from)
  }

  /// The ladder as a build that only knew versions up to `max` declared it.
  pub fn truncated(&self, max: u32) -> Result<Self> {
    let versions: Vec<SchemaVersion> = self
      .versions
      .iter()
      .filter(|v| v.version <= max)
      .cloned()
      .collect();
    if versions.is_empty() {
      return Err(Error::InvalidSchema(format!("no versions at or below {max}")));
    }
    Ok(Self { versions: versions.into() })
  }
}

fn validate_table_name(name: &str) -> Result<()> {
  let valid = name
    .chars()
    .next()
    .is_some_and(|c| c.is_ascii_lowercase())
    && name
      .chars()
      .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
  if valid {
    Ok(())
  } else {
    Err(Error::InvalidSchema(format!("invalid table name {name:?}")))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn versions_must_increase() {
    let err = SchemaLadder::new(vec![
      VersionDecl::new(2).table("a", "id"),
      VersionDecl::new(2).table("a", "id, name"),
    ])
    .unwrap_err();
    assert!(matches!(err, Error::InvalidSchema(_)));

    assert!(SchemaLadder::new(vec![]).is_err());
    assert!(SchemaLadder::new(vec![VersionDecl::new(0).table("a", "id")]).is_err());
  }

  #[test]
  fn rejects_bad_table_names_and_descriptors() {
    assert!(SchemaLadder::new(vec![VersionDecl::new(1).table("_meta", "id")]).is_err());
    assert!(SchemaLadder::new(vec![VersionDecl::new(1).table("Students", "id")]).is_err());
    assert!(SchemaLadder::new(vec![VersionDecl::new(1).table("a", "id, [x")]).is_err());
    assert!(
      SchemaLadder::new(vec![VersionDecl::new(1).table("a", "id").table("a", "id")]).is_err()
    );
  }

  #[test]
  fn pending_and_truncated() {
    let ladder = SchemaLadder::new(vec![
      VersionDecl::new(1).table("a", "id"),
      VersionDecl::new(2).table("a", "id, name").upgrade(|_| Ok(())),
      VersionDecl::new(3).table("a", "id, name").table("b", "++id"),
    ])
    .unwrap();

    assert_eq!(ladder.max_version(), 3);
    let pending: Vec<u32> = ladder.pending(1).map(|v| v.version).collect();
    assert_eq!(pending, vec![2, 3]);
    assert_eq!(ladder.pending(3).count(), 0);
    assert!(ladder.version(2).unwrap().upgrade().is_some());

    let old = ladder.truncated(2).unwrap();
    assert_eq!(old.max_version(), 2);
    assert!(old.latest().table("b").is_none());
    assert!(ladder.truncated(0).is_err());
  }
}

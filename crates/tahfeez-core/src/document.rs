//! Documents and primary keys.
//!
//! A [`Document`] is a loosely typed JSON field map. Shapes are only
//! enforced where the schema declares a key path: the primary key must be
//! extractable, and index paths are read with the same dotted notation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One schema-less record belonging to a table.
pub type Document = Map<String, Value>;

// ─── Key ─────────────────────────────────────────────────────────────────────

/// A primary key value extracted from a document.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(untagged)]
pub enum Key {
  Int(i64),
  Text(String),
  /// Key of a compound (`[a+b]`) key path, one component per field.
  Compound(Vec<Key>),
}

impl Key {
  /// Interpret a JSON value as a key.
  ///
  /// `null`, the empty string, booleans, objects, non-integral numbers and
  /// empty arrays are not keys; callers treat them as "absent".
  pub fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::Number(n) => n.as_i64().map(Key::Int).or_else(|| {
        n.as_f64()
          .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
          .map(|f| Key::Int(f as i64))
      }),
      Value::String(s) if !s.is_empty() => Some(Key::Text(s.clone())),
      Value::Array(items) if !items.is_empty() => items
        .iter()
        .map(Key::from_value)
        .collect::<Option<Vec<_>>>()
        .map(Key::Compound),
      _ => None,
    }
  }

  pub fn to_value(&self) -> Value {
    match self {
      Key::Int(n) => Value::from(*n),
      Key::Text(s) => Value::String(s.clone()),
      Key::Compound(parts) => Value::Array(parts.iter().map(Key::to_value).collect()),
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Key::Int(n) => Some(*n),
      _ => None,
    }
  }
}

impl fmt::Display for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Key::Int(n) => write!(f, "{n}"),
      Key::Text(s) => f.write_str(s),
      Key::Compound(parts) => {
        f.write_str("[")?;
        for (i, part) in parts.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{part}")?;
        }
        f.write_str("]")
      }
    }
  }
}

impl From<i64> for Key {
  fn from(n: i64) -> Self { Key::Int(n) }
}

impl From<&str> for Key {
  fn from(s: &str) -> Self { Key::Text(s.to_owned()) }
}

impl From<String> for Key {
  fn from(s: String) -> Self { Key::Text(s) }
}

// ─── Field paths ─────────────────────────────────────────────────────────────

/// Read a dotted field path (`"a.b"`) from a document.
pub fn get_path<'d>(doc: &'d Document, path: &str) -> Option<&'d Value> {
  let mut segments = path.split('.');
  let mut current = doc.get(segments.next()?)?;
  for segment in segments {
    current = current.as_object()?.get(segment)?;
  }
  Some(current)
}

/// Write a dotted field path, creating intermediate objects as needed.
///
/// A non-object value sitting on an intermediate segment is replaced.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
  match path.split_once('.') {
    None => {
      doc.insert(path.to_owned(), value);
    }
    Some((head, rest)) => {
      let slot = doc
        .entry(head.to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
      if !slot.is_object() {
        *slot = Value::Object(Map::new());
      }
      if let Value::Object(inner) = slot {
        set_path(inner, rest, value);
      }
    }
  }
}

/// True when the path is missing or holds `null`.
pub fn is_absent(doc: &Document, path: &str) -> bool {
  get_path(doc, path).is_none_or(Value::is_null)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn doc(value: Value) -> Document {
    match value {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  #[test]
  fn key_from_value_rejects_blank_and_fractional() {
    assert_eq!(Key::from_value(&json!(7)), Some(Key::Int(7)));
    assert_eq!(Key::from_value(&json!(7.0)), Some(Key::Int(7)));
    assert_eq!(Key::from_value(&json!(7.5)), None);
    assert_eq!(Key::from_value(&json!("")), None);
    assert_eq!(Key::from_value(&Value::Null), None);
    assert_eq!(
      Key::from_value(&json!(["s1", "2025-01-01"])),
      Some(Key::Compound(vec!["s1".into(), "2025-01-01".into()]))
    );
    assert_eq!(Key::from_value(&json!(["s1", null])), None);
  }

  #[test]
  fn key_serializes_untagged() {
    let key = Key::Compound(vec![Key::Int(1), "a".into()]);
    assert_eq!(serde_json::to_value(&key).unwrap(), json!([1, "a"]));
    let back: Key = serde_json::from_value(json!([1, "a"])).unwrap();
    assert_eq!(back, key);
    assert_eq!(key.to_string(), "[1, a]");
  }

  #[test]
  fn nested_paths() {
    let mut d = doc(json!({ "contact": { "phone": "123" }, "name": "x" }));
    assert_eq!(get_path(&d, "contact.phone"), Some(&json!("123")));
    assert_eq!(get_path(&d, "contact.email"), None);
    assert_eq!(get_path(&d, "name.first"), None);

    set_path(&mut d, "contact.email", json!("a@b"));
    set_path(&mut d, "name.first", json!("Ali"));
    assert_eq!(get_path(&d, "contact.email"), Some(&json!("a@b")));
    assert_eq!(get_path(&d, "name.first"), Some(&json!("Ali")));
    assert!(is_absent(&d, "missing"));
  }
}

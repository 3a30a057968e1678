//! Notification records.
//!
//! Notifications are append-only apart from their read flag. A notification
//! may carry a reference key naming the logical event it announces; at most
//! one notification per reference key is ever stored.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::{
  Result,
  document::{Document, Key},
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Category {
  #[default]
  Info,
  Financial,
  Admin,
  Class,
  Attendance,
}

/// Input to the notification emit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
  pub message:       String,
  pub category:      Category,
  pub reference_key: Option<String>,
  pub link:          Option<String>,
}

impl NewNotification {
  pub fn new(message: impl Into<String>, category: Category) -> Self {
    Self {
      message: message.into(),
      category,
      reference_key: None,
      link: None,
    }
  }

  pub fn reference(mut self, key: impl Into<String>) -> Self {
    self.reference_key = Some(key.into());
    self
  }

  pub fn link(mut self, link: impl Into<String>) -> Self {
    self.link = Some(link.into());
    self
  }
}

/// A stored notification, in the field layout shared with the remote table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id:            Option<Key>,
  pub message:       String,
  #[serde(rename = "type", default)]
  pub category:      Category,
  #[serde(with = "read_flag", default)]
  pub is_read:       bool,
  #[serde(with = "timestamp")]
  pub timestamp:     DateTime<Utc>,
  #[serde(rename = "reference_id", default)]
  pub reference_key: Option<String>,
  #[serde(default)]
  pub link:          Option<String>,
}

impl Notification {
  pub fn unread(input: NewNotification, at: DateTime<Utc>) -> Self {
    Self {
      id:            None,
      message:       input.message,
      category:      input.category,
      is_read:       false,
      timestamp:     at,
      reference_key: input.reference_key,
      link:          input.link,
    }
  }

  pub fn to_document(&self) -> Result<Document> {
    match serde_json::to_value(self)? {
      Value::Object(map) => Ok(map),
      _ => unreachable!("structs serialize to objects"),
    }
  }

  pub fn from_document(doc: Document) -> Result<Self> {
    Ok(serde_json::from_value(Value::Object(doc))?)
  }
}

/// The read flag is stored as `0`/`1` so it can be indexed; `true`/`false`
/// written by other clients is accepted.
mod read_flag {
  use super::*;

  pub fn serialize<S: Serializer>(flag: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u8(u8::from(*flag))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
      Bool(bool),
      Int(i64),
    }
    Ok(match Flag::deserialize(d)? {
      Flag::Bool(b) => b,
      Flag::Int(n) => n != 0,
    })
  }
}

/// Fixed-width RFC 3339 so the `timestamp` index orders lexically.
mod timestamp {
  use super::*;

  pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    DateTime::parse_from_rfc3339(&raw)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;

  #[test]
  fn document_layout_matches_remote_table() {
    let at = Utc.with_ymd_and_hms(2025, 3, 6, 9, 0, 0).unwrap();
    let n = Notification::unread(
      NewNotification::new("fee due", Category::Financial)
        .reference("payment-reminder-s1-2025-03")
        .link("#student-profile?id=s1"),
      at,
    );
    let doc = n.to_document().unwrap();
    assert_eq!(
      Value::Object(doc.clone()),
      json!({
        "message": "fee due",
        "type": "financial",
        "is_read": 0,
        "timestamp": "2025-03-06T09:00:00.000Z",
        "reference_id": "payment-reminder-s1-2025-03",
        "link": "#student-profile?id=s1",
      })
    );
    assert_eq!(Notification::from_document(doc).unwrap(), n);
  }

  #[test]
  fn accepts_boolean_read_flags() {
    let Value::Object(doc) = json!({
      "id": 4,
      "message": "m",
      "type": "admin",
      "is_read": true,
      "timestamp": "2025-03-06T09:00:00Z",
    }) else {
      unreachable!()
    };
    let n = Notification::from_document(doc).unwrap();
    assert!(n.is_read);
    assert_eq!(n.id, Some(Key::Int(4)));
    assert_eq!(n.reference_key, None);
    assert_eq!(n.category.to_string(), "admin");
  }
}

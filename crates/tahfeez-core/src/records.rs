//! Typed read views over stored documents.
//!
//! Tables hold loose field maps; these structs pick out the fields the
//! engines reason about and tolerate everything else. Writes keep going
//! through plain [`Document`]s so unknown fields survive.

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{Result, document::{Document, Key}};

/// Decode a document into a typed view.
pub fn decode<T: DeserializeOwned>(doc: Document) -> Result<T> {
  Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Remote rows carry `null` for unset columns; read it like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
  pub id:       Key,
  #[serde(default, deserialize_with = "null_as_default")]
  pub name:     String,
  #[serde(default)]
  pub class_id: Option<Key>,
  #[serde(default)]
  pub plan_id:  Option<Key>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
  pub id:            Key,
  #[serde(default, deserialize_with = "null_as_default")]
  pub name:          String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub fee:           f64,
  /// Start time as `HH:MM`.
  #[serde(default)]
  pub time:          Option<String>,
  /// Weekdays the class meets, Sunday = 0.
  #[serde(default, deserialize_with = "null_as_default")]
  pub schedule_days: Vec<u32>,
  #[serde(default)]
  pub teacher_id:    Option<Key>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinancialStatus {
  Paid,
  #[default]
  Pending,
  Exempt,
  #[serde(other)]
  Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
  #[serde(default)]
  pub id:         Option<Key>,
  pub student_id: Key,
  /// Billing period as `YYYY-MM`.
  pub month_year: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub status:     FinancialStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
  Present,
  Absent,
  Late,
  Sick,
}

impl AttendanceStatus {
  /// Late and sick still count toward attendance.
  pub fn counts_as_attended(self) -> bool { !matches!(self, Self::Absent) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
  #[serde(default)]
  pub id:         Option<Key>,
  pub student_id: Key,
  /// `YYYY-MM-DD`.
  pub date:       String,
  pub status:     AttendanceStatus,
}

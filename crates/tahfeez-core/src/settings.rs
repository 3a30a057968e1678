//! The singleton settings record.
//!
//! Stored in the `settings` table under [`SETTINGS_KEY`]. Fields missing from
//! the stored record, or stored as `null`, take their defaults; fields this
//! build does not know about are carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, document::Document};

pub const SETTINGS_KEY: &str = "userSettings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamField {
  pub name: String,
  pub mark: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
  pub key:                         String,
  pub app_name:                    String,
  pub admin_name:                  String,
  pub theme_color:                 String,
  pub font_size:                   String,
  pub currency:                    String,
  pub default_fee:                 f64,
  /// Day of the month after which unpaid fees are reminded.
  pub fee_due_date:                u32,
  pub enable_late_fees:            bool,
  pub late_fee_amount:             f64,
  /// Percentage.
  pub passing_score:               u32,
  pub exam_fields:                 Vec<ExamField>,
  pub notify_on_new_student:       bool,
  pub notify_on_fee_paid:          bool,
  pub enable_parent_portal:        bool,
  pub parent_portal_message:       String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub theme:                       Option<String>,
  /// Monthly attendance percentage below which a student is flagged.
  pub attendance_alert_threshold:  u32,
  pub class_reminder_lead_minutes: u32,
  #[serde(flatten)]
  pub extra:                       Map<String, Value>,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      key:                         SETTINGS_KEY.to_owned(),
      app_name:                    "منصة التحفيظ".to_owned(),
      admin_name:                  "مدير النظام".to_owned(),
      theme_color:                 "#10b981".to_owned(),
      font_size:                   "medium".to_owned(),
      currency:                    "SDG".to_owned(),
      default_fee:                 100.0,
      fee_due_date:                5,
      enable_late_fees:            false,
      late_fee_amount:             10.0,
      passing_score:               50,
      exam_fields:                 vec![
        ExamField { name: "جودة الحفظ".to_owned(), mark: 50 },
        ExamField { name: "أحكام التجويد".to_owned(), mark: 30 },
        ExamField { name: "جمال الصوت".to_owned(), mark: 20 },
      ],
      notify_on_new_student:       true,
      notify_on_fee_paid:          false,
      enable_parent_portal:        true,
      parent_portal_message:       "مرحباً بكم في بوابة متابعة الأبناء.".to_owned(),
      theme:                       None,
      attendance_alert_threshold:  75,
      class_reminder_lead_minutes: 10,
      extra:                       Map::new(),
    }
  }
}

impl Settings {
  pub fn from_document(mut doc: Document) -> Result<Self> {
    let known = Self::default().to_document()?;
    doc.retain(|field, value| !(value.is_null() && known.contains_key(field)));
    Ok(serde_json::from_value(Value::Object(doc))?)
  }

  pub fn to_document(&self) -> Result<Document> {
    match serde_json::to_value(self)? {
      Value::Object(mut map) => {
        map.insert("key".to_owned(), Value::String(SETTINGS_KEY.to_owned()));
        Ok(map)
      }
      _ => unreachable!("structs serialize to objects"),
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn stored_values_merge_over_defaults() {
    let Value::Object(doc) = json!({
      "key": "userSettings",
      "feeDueDate": 10,
      "theme": "dark",
      "printerName": "office",
    }) else {
      unreachable!()
    };
    let settings = Settings::from_document(doc).unwrap();
    assert_eq!(settings.fee_due_date, 10);
    assert_eq!(settings.theme.as_deref(), Some("dark"));
    assert_eq!(settings.currency, "SDG");
    assert_eq!(settings.class_reminder_lead_minutes, 10);
    assert_eq!(settings.extra.get("printerName"), Some(&json!("office")));

    let back = settings.to_document().unwrap();
    assert_eq!(back.get("printerName"), Some(&json!("office")));
    assert_eq!(back.get("feeDueDate"), Some(&json!(10)));
    assert_eq!(back.get("key"), Some(&json!(SETTINGS_KEY)));
  }

  #[test]
  fn null_fields_take_their_defaults() {
    let Value::Object(doc) = json!({
      "key": "userSettings",
      "feeDueDate": null,
      "defaultFee": null,
      "currency": null,
      "examFields": null,
      "classReminderLeadMinutes": 15,
      "printerName": null,
    }) else {
      unreachable!()
    };
    let settings = Settings::from_document(doc).unwrap();
    assert_eq!(settings.fee_due_date, 5);
    assert_eq!(settings.default_fee, 100.0);
    assert_eq!(settings.currency, "SDG");
    assert_eq!(settings.exam_fields.len(), 3);
    assert_eq!(settings.class_reminder_lead_minutes, 15);
    assert_eq!(settings.extra.get("printerName"), Some(&Value::Null));
  }
}

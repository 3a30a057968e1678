//! The school's table catalog: every schema version the store has ever had,
//! the aggregates whose deletion cascades, and the default sync list.

use std::collections::HashSet;

use serde_json::Value;

use crate::{
  Result,
  document::is_absent,
  ladder::{SchemaLadder, VersionDecl},
  store::{IndexQuery, StoreTx},
};

// ─── Table names ─────────────────────────────────────────────────────────────

pub const STUDENTS: &str = "students";
pub const TEACHERS: &str = "teachers";
pub const CLASSES: &str = "classes";
pub const PLANS: &str = "plans";
pub const ATTENDANCE: &str = "attendance";
pub const TASMEE3: &str = "tasmee3";
pub const EXAMS: &str = "exams";
pub const FINANCIALS: &str = "financials";
pub const EXPENSES: &str = "expenses";
pub const NOTIFICATIONS: &str = "notifications";
pub const SETTINGS: &str = "settings";

/// Tables pulled from the remote on every sync, in pull order.
pub const SYNC_TABLES: &[&str] = &[
  STUDENTS,
  CLASSES,
  PLANS,
  EXPENSES,
  NOTIFICATIONS,
  ATTENDANCE,
  EXAMS,
  FINANCIALS,
  SETTINGS,
];

// ─── Ladder ──────────────────────────────────────────────────────────────────

/// Every schema version, oldest first. Append new versions; never edit a
/// released one.
pub fn school_ladder() -> Result<SchemaLadder> {
  SchemaLadder::new(vec![
    VersionDecl::new(1)
      .table(STUDENTS, "id, class_id, name, *tags")
      .table(CLASSES, "id, name")
      .table(ATTENDANCE, "[student_id+date], date, status")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "id, student_id, month_year, type")
      .table(NOTIFICATIONS, "++id, is_read, timestamp")
      .table(SETTINGS, "key")
      .table(TASMEE3, "[student_id+sura+page], student_id"),
    VersionDecl::new(2)
      .table(STUDENTS, "id, class_id, name, plan_id, sex")
      .table(CLASSES, "id, name, fee")
      .table(PLANS, "id, name")
      .table(ATTENDANCE, "[student_id+date], date, status")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "[student_id+month_year], student_id, status")
      .table(NOTIFICATIONS, "++id, is_read, timestamp")
      .table(SETTINGS, "key")
      .table(TASMEE3, "++id, student_id, sura, page, timestamp")
      .table(EXPENSES, "id, date")
      .upgrade(default_class_fee),
    VersionDecl::new(3)
      .table(STUDENTS, "id, class_id, name, plan_id, sex")
      .table(CLASSES, "id, name, fee")
      .table(PLANS, "id, name")
      .table(ATTENDANCE, "[student_id+date], date, status")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "[student_id+month_year], student_id, status")
      .table(NOTIFICATIONS, "++id, is_read, timestamp")
      .table(SETTINGS, "key")
      .table(TASMEE3, "++id, student_id, page_number, timestamp")
      .table(EXPENSES, "id, date")
      .upgrade(|tx| tx.clear(TASMEE3).map(drop)),
    VersionDecl::new(4)
      .table(STUDENTS, "id, class_id, name, plan_id, sex")
      .table(CLASSES, "id, name, fee")
      .table(PLANS, "id, name")
      .table(ATTENDANCE, "++id, [student_id+date]")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "++id, [student_id+month_year]")
      .table(NOTIFICATIONS, "++id, is_read, timestamp")
      .table(SETTINGS, "key")
      .table(TASMEE3, "++id, student_id, page_number, timestamp")
      .table(EXPENSES, "id, date"),
    VersionDecl::new(5)
      .table(STUDENTS, "id, class_id, name, plan_id, sex")
      .table(CLASSES, "id, name, fee")
      .table(PLANS, "id, name")
      .table(ATTENDANCE, "++id, [student_id+date]")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "++id, [student_id+month_year], month_year")
      .table(NOTIFICATIONS, "++id, is_read, timestamp")
      .table(SETTINGS, "key")
      .table(TASMEE3, "++id, student_id, page_number, timestamp")
      .table(EXPENSES, "id, date"),
    VersionDecl::new(6)
      .table(STUDENTS, "id, class_id, name, plan_id, sex")
      .table(CLASSES, "id, name, fee")
      .table(PLANS, "id, name")
      .table(ATTENDANCE, "++id, [student_id+date], date")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "++id, [student_id+month_year], month_year")
      .table(NOTIFICATIONS, "++id, is_read, timestamp")
      .table(SETTINGS, "key")
      .table(TASMEE3, "++id, student_id, page_number, timestamp")
      .table(EXPENSES, "id, date"),
    VersionDecl::new(7)
      .table(STUDENTS, "id, class_id, name, plan_id, sex")
      .table(CLASSES, "id, name, fee, time, *schedule_days")
      .table(PLANS, "id, name")
      .table(ATTENDANCE, "++id, [student_id+date], date")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "++id, [student_id+month_year], month_year")
      .table(NOTIFICATIONS, "++id, is_read, timestamp, reference_id")
      .table(SETTINGS, "key")
      .table(TASMEE3, "++id, student_id, page_number, timestamp")
      .table(EXPENSES, "id, date"),
    // Teachers were written by the feature code long before the table was
    // declared; v8 makes it real and indexes every foreign key that a
    // cascading delete walks.
    VersionDecl::new(8)
      .table(STUDENTS, "id, class_id, name, plan_id, sex")
      .table(TEACHERS, "id, name")
      .table(CLASSES, "id, name, fee, time, *schedule_days, teacher_id")
      .table(PLANS, "id, name")
      .table(ATTENDANCE, "++id, [student_id+date], date, student_id")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "++id, [student_id+month_year], month_year, student_id")
      .table(NOTIFICATIONS, "++id, is_read, timestamp, reference_id")
      .table(SETTINGS, "key")
      .table(TASMEE3, "++id, student_id, page_number, timestamp")
      .table(EXPENSES, "id, date")
      .upgrade(normalize_classes),
    VersionDecl::new(9)
      .table(STUDENTS, "id, class_id, name, plan_id, sex")
      .table(TEACHERS, "id, name")
      .table(CLASSES, "id, name, fee, time, *schedule_days, teacher_id")
      .table(PLANS, "id, name")
      .table(ATTENDANCE, "++id, [student_id+date], date, student_id")
      .table(EXAMS, "id, student_id, date")
      .table(FINANCIALS, "++id, [student_id+month_year], month_year, student_id")
      .table(NOTIFICATIONS, "++id, is_read, timestamp, &reference_id")
      .table(SETTINGS, "key")
      .table(TASMEE3, "++id, student_id, page_number, timestamp")
      .table(EXPENSES, "id, date")
      .upgrade(dedupe_notifications),
  ])
}

// ─── Upgrade transforms ──────────────────────────────────────────────────────

fn default_class_fee(tx: &mut dyn StoreTx) -> Result<()> {
  tx.modify(CLASSES, &mut |class| {
    if class.contains_key("fee") {
      return false;
    }
    class.insert("fee".to_owned(), Value::from(0));
    true
  })?;
  Ok(())
}

/// Rows written by v2–v7 builds (or pulled from the remote) may still lack a
/// fee or a schedule.
fn normalize_classes(tx: &mut dyn StoreTx) -> Result<()> {
  tx.modify(CLASSES, &mut |class| {
    let mut changed = false;
    if is_absent(class, "fee") {
      class.insert("fee".to_owned(), Value::from(0));
      changed = true;
    }
    if !class.get("schedule_days").is_some_and(Value::is_array) {
      class.insert("schedule_days".to_owned(), Value::Array(Vec::new()));
      changed = true;
    }
    changed
  })?;
  Ok(())
}

/// Prepares for the unique `reference_id` index: read flags become `0`/`1`,
/// blank reference keys become null, and only the oldest notification per
/// reference key survives.
fn dedupe_notifications(tx: &mut dyn StoreTx) -> Result<()> {
  tx.modify(NOTIFICATIONS, &mut |n| {
    let mut changed = false;
    let flag = match n.get("is_read") {
      Some(Value::Bool(b)) => Some(u8::from(*b)),
      Some(Value::Number(num)) if num.as_i64().is_some_and(|v| v != 0 && v != 1) => Some(1),
      Some(Value::Number(_)) => None,
      _ => Some(0),
    };
    if let Some(flag) = flag {
      n.insert("is_read".to_owned(), Value::from(flag));
      changed = true;
    }
    if n.get("reference_id").is_some_and(|v| v.as_str() == Some("")) {
      n.insert("reference_id".to_owned(), Value::Null);
      changed = true;
    }
    changed
  })?;

  let mut seen = HashSet::new();
  let mut duplicates = Vec::new();
  for n in tx.query(&IndexQuery::all(NOTIFICATIONS))? {
    let Some(reference) = n.get("reference_id").and_then(Value::as_str) else {
      continue;
    };
    if !seen.insert(reference.to_owned())
      && let Some(id) = n.get("id").and_then(crate::Key::from_value)
    {
      duplicates.push(id);
    }
  }
  if !duplicates.is_empty() {
    tracing::info!(count = duplicates.len(), "removing duplicate notifications");
    tx.bulk_delete(NOTIFICATIONS, &duplicates)?;
  }
  Ok(())
}

// ─── Aggregates ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentAction {
  /// Remove the dependent row.
  Delete,
  /// Keep the row, null its reference.
  Nullify,
}

/// A table whose rows refer to an aggregate root through `field`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependent {
  pub table:  &'static str,
  pub field:  &'static str,
  pub action: DependentAction,
}

const fn dependent(table: &'static str, field: &'static str, action: DependentAction) -> Dependent {
  Dependent { table, field, action }
}

const STUDENT_DEPENDENTS: &[Dependent] = &[
  dependent(ATTENDANCE, "student_id", DependentAction::Delete),
  dependent(EXAMS, "student_id", DependentAction::Delete),
  dependent(TASMEE3, "student_id", DependentAction::Delete),
  dependent(FINANCIALS, "student_id", DependentAction::Delete),
];
const CLASS_DEPENDENTS: &[Dependent] = &[dependent(STUDENTS, "class_id", DependentAction::Nullify)];
const TEACHER_DEPENDENTS: &[Dependent] = &[dependent(CLASSES, "teacher_id", DependentAction::Nullify)];
const PLAN_DEPENDENTS: &[Dependent] = &[dependent(STUDENTS, "plan_id", DependentAction::Nullify)];

/// Rows to remove or detach when a document of `root` is deleted.
pub fn dependents(root: &str) -> &'static [Dependent] {
  match root {
    STUDENTS => STUDENT_DEPENDENTS,
    CLASSES => CLASS_DEPENDENTS,
    TEACHERS => TEACHER_DEPENDENTS,
    PLANS => PLAN_DEPENDENTS,
    _ => &[],
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ladder_declares_nine_versions() {
    let ladder = school_ladder().unwrap();
    assert_eq!(ladder.max_version(), 9);
    assert_eq!(ladder.pending(0).count(), 9);
    let latest = ladder.latest();
    assert!(latest.table(TEACHERS).is_some());
    assert!(latest.table(NOTIFICATIONS).unwrap().index("reference_id").unwrap().unique);
  }

  #[test]
  fn sync_tables_exist_in_latest_schema() {
    let ladder = school_ladder().unwrap();
    for table in SYNC_TABLES {
      assert!(ladder.latest().table(table).is_some(), "{table}");
    }
  }

  #[test]
  fn students_own_their_records() {
    let tables: Vec<_> = dependents(STUDENTS).iter().map(|d| d.table).collect();
    assert_eq!(tables, [ATTENDANCE, EXAMS, TASMEE3, FINANCIALS]);
    assert!(dependents(STUDENTS).iter().all(|d| d.action == DependentAction::Delete));
    assert_eq!(dependents(TEACHERS)[0].action, DependentAction::Nullify);
    assert!(dependents(NOTIFICATIONS).is_empty());
  }

  #[test]
  fn every_dependent_field_is_indexed() {
    let ladder = school_ladder().unwrap();
    let latest = ladder.latest();
    for root in latest.table_names() {
      for dep in dependents(root) {
        let schema = latest.table(dep.table).unwrap();
        let spec = schema.index(dep.field);
        assert!(
          spec.is_some_and(|s| !s.multi_entry),
          "{}.{} must be a plain index",
          dep.table,
          dep.field
        );
      }
    }
  }
}

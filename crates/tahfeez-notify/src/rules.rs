//! Reminder rules.
//!
//! A rule is a pure function from a [`RuleContext`] snapshot to the
//! notifications it would like to see. Every candidate carries a reference
//! key derived from the event it announces (student and month, class and
//! day), so evaluating the same rule again later is harmless.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDateTime, NaiveTime};
use tahfeez_core::{
  Key,
  notification::{Category, NewNotification},
  records::{AttendanceRecord, Class, FinancialRecord, FinancialStatus, Student},
  settings::Settings,
};

/// Everything the rules look at, loaded once per check.
#[derive(Debug, Clone)]
pub struct RuleContext {
  /// Local wall-clock time of the check.
  pub now:           NaiveDateTime,
  pub settings:      Settings,
  pub students:      Vec<Student>,
  /// Classes whose schedule includes `now`'s weekday.
  pub classes_today: Vec<Class>,
  /// Financial records for `now`'s month.
  pub financials:    Vec<FinancialRecord>,
  /// Attendance records for `now`'s month.
  pub attendance:    Vec<AttendanceRecord>,
}

impl RuleContext {
  /// An empty snapshot at `now` with default settings.
  pub fn empty(now: NaiveDateTime) -> Self {
    Self {
      now,
      settings: Settings::default(),
      students: Vec::new(),
      classes_today: Vec::new(),
      financials: Vec::new(),
      attendance: Vec::new(),
    }
  }

  /// `YYYY-MM`.
  pub fn month(&self) -> String { self.now.format("%Y-%m").to_string() }

  /// `YYYY-MM-DD`.
  pub fn today(&self) -> String { self.now.format("%Y-%m-%d").to_string() }

  /// Sunday = 0.
  pub fn weekday(&self) -> u32 { self.now.weekday().num_days_from_sunday() }

  fn student_name<'a>(&'a self, id: &Key) -> Option<&'a str> {
    self
      .students
      .iter()
      .find(|s| &s.id == id)
      .map(|s| s.name.as_str())
  }
}

pub trait Rule: Send + Sync {
  fn name(&self) -> &'static str;

  fn evaluate(&self, cx: &RuleContext) -> Vec<NewNotification>;
}

/// The rules the school runs on every check.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
  vec![
    Box::new(PaymentReminder),
    Box::new(MonthEndReminders),
    Box::new(ClassStartReminder),
    Box::new(AttendanceAlert),
  ]
}

fn profile_link(student: &Key) -> String { format!("#student-profile?id={student}") }

// ─── Payments ────────────────────────────────────────────────────────────────

/// Once the fee due day has passed, one reminder per student whose fee for
/// the month is unrecorded or still pending.
pub struct PaymentReminder;

impl Rule for PaymentReminder {
  fn name(&self) -> &'static str { "payment-reminder" }

  fn evaluate(&self, cx: &RuleContext) -> Vec<NewNotification> {
    if cx.now.day() <= cx.settings.fee_due_date {
      return Vec::new();
    }
    let month = cx.month();
    let status: HashMap<&Key, FinancialStatus> = cx
      .financials
      .iter()
      .filter(|f| f.month_year == month)
      .map(|f| (&f.student_id, f.status))
      .collect();

    cx.students
      .iter()
      .filter(|s| matches!(status.get(&s.id), None | Some(FinancialStatus::Pending)))
      .map(|s| {
        NewNotification::new(
          format!("تذكير: الطالب {} لم يدفع رسوم شهر {month}.", s.name),
          Category::Financial,
        )
        .reference(format!("payment-reminder-{}-{month}", s.id))
        .link(profile_link(&s.id))
      })
      .collect()
  }
}

// ─── Month end ───────────────────────────────────────────────────────────────

/// From the 28th on: prepare salaries and the monthly financial report.
pub struct MonthEndReminders;

const MONTH_END_DAY: u32 = 28;

impl Rule for MonthEndReminders {
  fn name(&self) -> &'static str { "month-end" }

  fn evaluate(&self, cx: &RuleContext) -> Vec<NewNotification> {
    if cx.now.day() < MONTH_END_DAY {
      return Vec::new();
    }
    let month = cx.month();
    vec![
      NewNotification::new("تذكير: قم بحساب وتجهيز رواتب الموظفين لهذا الشهر.", Category::Admin)
        .reference(format!("salary-prep-{month}"))
        .link("#financials"),
      NewNotification::new("تذكير: قم بإعداد التقرير المالي الشهري.", Category::Admin)
        .reference(format!("financial-report-{month}"))
        .link("#financials-dashboard"),
    ]
  }
}

// ─── Class start ─────────────────────────────────────────────────────────────

/// Classes meeting today that start within the configured lead time.
pub struct ClassStartReminder;

impl Rule for ClassStartReminder {
  fn name(&self) -> &'static str { "class-start" }

  fn evaluate(&self, cx: &RuleContext) -> Vec<NewNotification> {
    let lead = i64::from(cx.settings.class_reminder_lead_minutes);
    let weekday = cx.weekday();
    let today = cx.today();

    cx.classes_today
      .iter()
      .filter(|c| c.schedule_days.contains(&weekday))
      .filter(|c| {
        let Some(start) = c.time.as_deref().and_then(parse_start) else {
          return false;
        };
        let until = cx.now.date().and_time(start) - cx.now;
        until.num_seconds() > 0 && until.num_seconds() <= lead * 60
      })
      .map(|c| {
        let link = format!("#students?class_id={}", c.id);
        NewNotification::new(
          format!("تنبيه: حلقة {} ستبدأ خلال {lead} دقائق.", c.name),
          Category::Class,
        )
        .reference(format!("class-start-{}-{today}", c.id))
        .link(link)
      })
      .collect()
  }
}

/// `HH:MM`, tolerating a trailing `:SS`.
fn parse_start(raw: &str) -> Option<NaiveTime> {
  let raw = raw.trim();
  NaiveTime::parse_from_str(raw, "%H:%M")
    .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
    .ok()
}

// ─── Attendance ──────────────────────────────────────────────────────────────

/// Students attending less than the configured share of this month's
/// sessions, once enough sessions are on record to judge.
pub struct AttendanceAlert;

/// Fewer records than this say nothing about a student yet.
const MIN_SESSIONS: usize = 4;

impl Rule for AttendanceAlert {
  fn name(&self) -> &'static str { "attendance-low" }

  fn evaluate(&self, cx: &RuleContext) -> Vec<NewNotification> {
    let month = cx.month();
    let threshold = cx.settings.attendance_alert_threshold as usize;

    // (attended, total) per student.
    let mut tally: BTreeMap<&Key, (usize, usize)> = BTreeMap::new();
    for record in cx.attendance.iter().filter(|r| r.date.starts_with(&month)) {
      let entry = tally.entry(&record.student_id).or_default();
      entry.0 += usize::from(record.status.counts_as_attended());
      entry.1 += 1;
    }

    tally
      .into_iter()
      .filter(|&(_, (attended, total))| total >= MIN_SESSIONS && attended * 100 < threshold * total)
      .filter_map(|(id, (attended, total))| {
        // Records of deleted students are ignored.
        let name = cx.student_name(id)?;
        let rate = attended * 100 / total;
        Some(
          NewNotification::new(
            format!("تنبيه: نسبة حضور الطالب {name} هذا الشهر {rate}%."),
            Category::Attendance,
          )
          .reference(format!("attendance-low-{id}-{month}"))
          .link(profile_link(id)),
        )
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use tahfeez_core::records::AttendanceStatus;

  use super::*;

  fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
      .unwrap()
      .and_hms_opt(h, min, 0)
      .unwrap()
  }

  fn student(id: &str, name: &str) -> Student {
    Student { id: Key::from(id), name: name.into(), class_id: None, plan_id: None }
  }

  fn references(out: &[NewNotification]) -> Vec<&str> {
    out.iter().filter_map(|n| n.reference_key.as_deref()).collect()
  }

  #[test]
  fn payment_reminders_start_after_the_due_day() {
    let mut cx = RuleContext::empty(at(2025, 3, 5, 9, 0));
    cx.students = vec![student("s1", "Ali"), student("s2", "Omar"), student("s3", "Zaid")];
    cx.financials = vec![
      FinancialRecord {
        id:         None,
        student_id: Key::from("s1"),
        month_year: "2025-03".into(),
        status:     FinancialStatus::Paid,
      },
      FinancialRecord {
        id:         None,
        student_id: Key::from("s2"),
        month_year: "2025-03".into(),
        status:     FinancialStatus::Pending,
      },
    ];
    assert!(PaymentReminder.evaluate(&cx).is_empty());

    cx.now = at(2025, 3, 6, 9, 0);
    let out = PaymentReminder.evaluate(&cx);
    assert_eq!(
      references(&out),
      ["payment-reminder-s2-2025-03", "payment-reminder-s3-2025-03"]
    );
    assert_eq!(out[1].link.as_deref(), Some("#student-profile?id=s3"));
    assert_eq!(out[1].category, Category::Financial);
  }

  #[test]
  fn month_end_reminders_from_the_28th() {
    assert!(MonthEndReminders.evaluate(&RuleContext::empty(at(2025, 2, 27, 23, 59))).is_empty());
    let out = MonthEndReminders.evaluate(&RuleContext::empty(at(2025, 2, 28, 0, 0)));
    assert_eq!(references(&out), ["salary-prep-2025-02", "financial-report-2025-02"]);
  }

  #[test]
  fn class_reminder_window_is_open_below_and_closed_above() {
    // 2025-03-09 is a Sunday.
    let class = Class {
      id:            Key::from("c1"),
      name:          "Circle A".into(),
      fee:           0.0,
      time:          Some("16:30".into()),
      schedule_days: vec![0, 3],
      teacher_id:    None,
    };
    let mut cx = RuleContext::empty(at(2025, 3, 9, 16, 20));
    cx.classes_today = vec![class];

    assert_eq!(references(&ClassStartReminder.evaluate(&cx)), ["class-start-c1-2025-03-09"]);

    cx.now = at(2025, 3, 9, 16, 19);
    assert!(ClassStartReminder.evaluate(&cx).is_empty());
    cx.now = at(2025, 3, 9, 16, 30);
    assert!(ClassStartReminder.evaluate(&cx).is_empty());
    // Monday: not scheduled.
    cx.now = at(2025, 3, 10, 16, 25);
    assert!(ClassStartReminder.evaluate(&cx).is_empty());
  }

  #[test]
  fn low_attendance_needs_enough_sessions() {
    let mut cx = RuleContext::empty(at(2025, 3, 20, 12, 0));
    cx.students = vec![student("s1", "Ali"), student("s2", "Omar")];
    let record = |sid: &str, day: u32, status| AttendanceRecord {
      id:         None,
      student_id: Key::from(sid),
      date:       format!("2025-03-{day:02}"),
      status,
    };
    use AttendanceStatus::*;
    cx.attendance = vec![
      // s1: 2 of 4 attended, 50 %.
      record("s1", 2, Present),
      record("s1", 4, Absent),
      record("s1", 6, Late),
      record("s1", 9, Absent),
      // s2: 1 of 3, too few to judge.
      record("s2", 2, Absent),
      record("s2", 4, Absent),
      record("s2", 6, Sick),
    ];

    let out = AttendanceAlert.evaluate(&cx);
    assert_eq!(references(&out), ["attendance-low-s1-2025-03"]);
    assert!(out[0].message.contains("50%"));

    cx.settings.attendance_alert_threshold = 50;
    assert!(AttendanceAlert.evaluate(&cx).is_empty());
  }
}

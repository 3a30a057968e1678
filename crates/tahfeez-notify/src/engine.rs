//! [`NotificationEngine`]: loads a rule snapshot, evaluates every rule and
//! emits what they produce.

use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::de::DeserializeOwned;
use tahfeez_core::{
  Document, LocalStore, Matcher, catalog,
  notification::Notification,
  records::{self, AttendanceRecord, Class, FinancialRecord, Student},
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
  error::{Error, Result},
  notifier::Notifier,
  rules::{Rule, RuleContext, default_rules},
};

pub struct NotificationEngine<S> {
  notifier: Notifier<S>,
  rules:    Vec<Box<dyn Rule>>,
}

impl<S: LocalStore + 'static> NotificationEngine<S> {
  pub fn new(notifier: Notifier<S>) -> Self { Self::with_rules(notifier, default_rules()) }

  pub fn with_rules(notifier: Notifier<S>, rules: Vec<Box<dyn Rule>>) -> Self {
    Self { notifier, rules }
  }

  pub fn notifier(&self) -> &Notifier<S> { &self.notifier }

  /// Run every rule against the store as of the local wall clock.
  pub async fn run_checks(&self) -> Result<Vec<Notification>> {
    self.run_checks_at(Local::now().naive_local()).await
  }

  /// Run every rule as if it were `now`. Returns the notifications that
  /// were new; candidates already on record are skipped.
  pub async fn run_checks_at(&self, now: NaiveDateTime) -> Result<Vec<Notification>> {
    let cx = self.load_context(now).await?;
    let mut emitted = Vec::new();
    for rule in &self.rules {
      let candidates = rule.evaluate(&cx);
      debug!(rule = rule.name(), candidates = candidates.len(), "rule evaluated");
      for candidate in candidates {
        if let Some(n) = self.notifier.emit(candidate).await? {
          emitted.push(n);
        }
      }
    }
    if !emitted.is_empty() {
      info!(count = emitted.len(), "new notifications");
    }
    Ok(emitted)
  }

  /// Snapshot of the tables the rules read, scoped to `now`'s day and month.
  pub async fn load_context(&self, now: NaiveDateTime) -> Result<RuleContext> {
    let db = self.notifier.db();
    let mut cx = RuleContext::empty(now);
    let month = cx.month();

    cx.settings = db.settings().await.map_err(Error::store)?;
    cx.students = decode_all::<Student>(
      catalog::STUDENTS,
      db.all(catalog::STUDENTS).await.map_err(Error::store)?,
    );
    cx.classes_today = decode_all::<Class>(
      catalog::CLASSES,
      db.query(catalog::CLASSES, "schedule_days", Matcher::equals(cx.weekday()))
        .to_vec()
        .await
        .map_err(Error::store)?,
    );
    cx.financials = decode_all::<FinancialRecord>(
      catalog::FINANCIALS,
      db.query(catalog::FINANCIALS, "month_year", Matcher::equals(month.as_str()))
        .to_vec()
        .await
        .map_err(Error::store)?,
    );
    cx.attendance = decode_all::<AttendanceRecord>(
      catalog::ATTENDANCE,
      db.query(catalog::ATTENDANCE, "date", Matcher::starts_with(format!("{month}-")))
        .to_vec()
        .await
        .map_err(Error::store)?,
    );
    Ok(cx)
  }

  /// Check every `period` until the task is dropped. Failures are logged.
  pub async fn run_periodic(&self, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      ticker.tick().await;
      if let Err(e) = self.run_checks().await {
        warn!(error = %e, "notification checks failed");
      }
    }
  }
}

/// Rows that do not fit the typed view are left out of the checks rather
/// than failing them.
fn decode_all<T: DeserializeOwned>(table: &str, docs: Vec<Document>) -> Vec<T> {
  docs
    .into_iter()
    .filter_map(|doc| match records::decode(doc) {
      Ok(record) => Some(record),
      Err(e) => {
        debug!(table, error = %e, "skipping row the rules cannot read");
        None
      }
    })
    .collect()
}

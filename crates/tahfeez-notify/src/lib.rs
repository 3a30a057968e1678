//! Deduplicated notifications for the Tahfeez school manager.
//!
//! [`Notifier`] owns the notification log: it appends, marks read and
//! publishes the unread count. [`NotificationEngine`] evaluates the
//! reminder [`rules`] against the current store contents and emits what
//! they find; a reference key guarantees each logical event is announced
//! at most once no matter how often the checks run.

pub mod engine;
pub mod error;
pub mod notifier;
pub mod rules;

pub use engine::NotificationEngine;
pub use error::{Error, Result};
pub use notifier::Notifier;
pub use rules::{Rule, RuleContext, default_rules};

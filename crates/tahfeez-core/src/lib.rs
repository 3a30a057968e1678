//! Core types and trait definitions for the Tahfeez local-first data layer.
//!
//! This crate is deliberately free of database and HTTP dependencies. It
//! declares the document model, the schema ladder, the [`LocalStore`]
//! abstraction and the [`SchoolDb`] write façade that every feature module
//! goes through. Storage backends (e.g. `tahfeez-store-sqlite`) implement
//! the store traits; the sync and notification engines consume them.

// Native `async fn` in traits; the returned futures carry explicit `Send`
// bounds where it matters.
#![allow(async_fn_in_trait)]

pub mod catalog;
pub mod db;
pub mod document;
pub mod error;
pub mod ladder;
pub mod notification;
pub mod records;
pub mod schema;
pub mod settings;
pub mod store;

pub use db::SchoolDb;
pub use document::{Document, Key};
pub use error::{Error, Result};
pub use ladder::{SchemaLadder, SchemaVersion, VersionDecl};
pub use store::{Collection, IndexQuery, LocalStore, Matcher, StoreTx};

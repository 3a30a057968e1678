//! Bookkeeping tables shared by every schema version.
//!
//! Document tables themselves are created by the migration runner from the
//! schema ladder; see [`crate::migrate`].

/// Executed on every open before migrating; idempotent.
pub const BOOTSTRAP: &str = "
PRAGMA journal_mode = WAL;

-- Primary key descriptor each document table was last built with.
CREATE TABLE IF NOT EXISTS _tables (
    tbl          TEXT PRIMARY KEY,
    primary_key  TEXT NOT NULL
);

-- Auto-increment high-water marks. Survive table clears.
CREATE TABLE IF NOT EXISTS _sequences (
    tbl   TEXT PRIMARY KEY,
    last  INTEGER NOT NULL
);
";

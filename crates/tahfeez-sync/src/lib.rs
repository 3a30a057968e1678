//! Remote-wins synchronization for the Tahfeez local store.
//!
//! A cycle fetches a full snapshot of every synced table from a
//! [`RemoteSource`] and then, in a single store transaction, replaces each
//! local table with its snapshot. Local edits are never pushed upstream.

pub mod engine;
pub mod error;
pub mod remote;

pub use engine::{DataChanged, SyncEngine, SyncState, Trigger};
pub use error::{RemoteError, Result, SyncError, Unavailable};
pub use remote::{RemoteConfig, RemoteSource, RestRemote};

#[cfg(test)]
mod tests;

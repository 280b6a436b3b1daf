//! Durable local index of what has already been synced.
//!
//! One SQLite database per state directory maps each source-relative path to
//! the size, mtime, digest, remote key and etag recorded at its last
//! successful upload. Repeated runs consult it to skip unchanged files.

pub mod db;
pub mod error;
pub mod lock;
pub mod schema;
pub mod types;

pub use db::{SqliteStateIndex, StateIndex};
pub use error::StateError;
pub use lock::StateLock;
pub use types::{FileRecord, IndexSummary, SyncRun};

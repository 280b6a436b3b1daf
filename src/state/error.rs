//! Error types for the state index.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during state index operations.
///
/// The sync engine treats every variant as fatal to the run: failing to
/// persist a record would make the next run upload the file again.
#[derive(Error, Debug)]
pub enum StateError {
    /// Failed to open or create the database file.
    #[error("Failed to open state index at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a schema migration.
    #[error("State index migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("State index query failed: {0}")]
    Query(String),

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),

    /// The database schema version is newer than supported.
    #[error("State index schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },

    /// Another process holds the state directory lock.
    #[error("Another photosync-rs instance is using this state directory (lock: {0})")]
    Locked(PathBuf),

    /// Failed to create the lock file.
    #[error("Failed to create lock file {path}: {source}")]
    LockFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StateError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}

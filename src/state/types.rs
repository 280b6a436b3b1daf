//! Types for the state index.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sync::SyncStats;

/// The last successful sync of one source-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Source-relative path with `/` separators (unique key).
    pub relative_path: String,
    /// Hex-encoded SHA-256 of the uploaded bytes.
    pub sha256: String,
    /// Content-addressed key the bytes were uploaded under.
    pub remote_key: String,
    /// Integrity token returned by the store, if any.
    pub etag: Option<String>,
    pub file_size: u64,
    pub mtime_ns: i64,
    pub last_synced_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a record stamped with the current time.
    pub fn new(
        relative_path: String,
        file_size: u64,
        mtime_ns: i64,
        sha256: String,
        remote_key: String,
        etag: Option<String>,
    ) -> Self {
        Self {
            relative_path,
            sha256,
            remote_key,
            etag,
            file_size,
            mtime_ns,
            last_synced_at: Utc::now(),
        }
    }

    /// Whether the file on disk still has the recorded size and mtime.
    ///
    /// Content is not re-hashed: matching metadata is taken as unchanged.
    pub fn matches_metadata(&self, size: u64, mtime_ns: i64) -> bool {
        self.file_size == size && self.mtime_ns == mtime_ns
    }
}

/// A row of the `sync_runs` table.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: SyncStats,
    pub interrupted: bool,
}

/// Summary of the state index, used by the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub total_files: u64,
    pub total_bytes: u64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_run: Option<SyncRun>,
}

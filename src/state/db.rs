//! State index trait and SQLite implementation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StateError;
use super::schema;
use super::types::{FileRecord, IndexSummary, SyncRun};
use crate::sync::SyncStats;

/// Trait for state index operations.
///
/// Object-safe so the engine can hold an `Arc<dyn StateIndex>` shared across
/// concurrent workers. Implementations serialize writes internally; callers
/// need no external locking.
#[async_trait]
pub trait StateIndex: Send + Sync {
    /// Point lookup by source-relative path. No side effects.
    async fn lookup(&self, relative_path: &str) -> Result<Option<FileRecord>, StateError>;

    /// Atomically create or replace the record for `record.relative_path`.
    async fn upsert(&self, record: &FileRecord) -> Result<(), StateError>;

    /// All records whose content digest equals `sha256`.
    ///
    /// Not consulted by the sync engine; exposed for dedup queries.
    #[allow(dead_code)]
    async fn lookup_by_digest(&self, sha256: &str) -> Result<Vec<FileRecord>, StateError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self) -> Result<i64, StateError>;

    /// Complete a sync run with its final counters.
    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncStats,
        interrupted: bool,
    ) -> Result<(), StateError>;

    /// Get a summary of the index.
    async fn get_summary(&self) -> Result<IndexSummary, StateError>;
}

/// SQLite implementation of the state index.
pub struct SqliteStateIndex {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync. The lock is
    /// the single-writer critical section for concurrent upserts.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for SqliteStateIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStateIndex")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

const RECORD_COLUMNS: &str =
    "relative_path, file_size, mtime_ns, sha256, remote_key, etag, last_synced_at";

impl SqliteStateIndex {
    /// Open or create an index at the given path.
    pub async fn open(path: &Path) -> Result<Self, StateError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StateError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            // WAL keeps committed upserts durable across crashes
            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StateError::Migration)?;

            // NORMAL may lose the very last commit on power loss; that file
            // is simply re-detected as changed on the next run
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StateError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StateError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory index (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    /// Get the path to the database file.
    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StateError> {
        self.conn
            .lock()
            .map_err(|e| StateError::Query(e.to_string()))
    }
}

#[async_trait]
impl StateIndex for SqliteStateIndex {
    async fn lookup(&self, relative_path: &str) -> Result<Option<FileRecord>, StateError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM file_index WHERE relative_path = ?1",
                RECORD_COLUMNS
            ),
            [relative_path],
            row_to_file_record,
        )
        .optional()
        .map_err(StateError::query)
    }

    async fn upsert(&self, record: &FileRecord) -> Result<(), StateError> {
        let conn = self.conn()?;

        // Single statement, so the replacement is atomic under autocommit
        conn.execute(
            r#"
            INSERT INTO file_index (relative_path, file_size, mtime_ns, sha256, remote_key, etag, last_synced_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(relative_path) DO UPDATE SET
                file_size = excluded.file_size,
                mtime_ns = excluded.mtime_ns,
                sha256 = excluded.sha256,
                remote_key = excluded.remote_key,
                etag = excluded.etag,
                last_synced_at = excluded.last_synced_at
            "#,
            rusqlite::params![
                &record.relative_path,
                record.file_size as i64,
                record.mtime_ns,
                &record.sha256,
                &record.remote_key,
                &record.etag,
                record.last_synced_at.timestamp(),
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn lookup_by_digest(&self, sha256: &str) -> Result<Vec<FileRecord>, StateError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM file_index WHERE sha256 = ?1 ORDER BY relative_path",
                RECORD_COLUMNS
            ))
            .map_err(StateError::query)?;

        let records = stmt
            .query_map([sha256], row_to_file_record)
            .map_err(StateError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StateError::query)?;

        Ok(records)
    }

    async fn start_sync_run(&self) -> Result<i64, StateError> {
        let started_at = Utc::now().timestamp();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at) VALUES (?1)",
            [started_at],
        )
        .map_err(StateError::query)?;

        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncStats,
        interrupted: bool,
    ) -> Result<(), StateError> {
        let completed_at = Utc::now().timestamp();

        let conn = self.conn()?;
        conn.execute(
            r#"
            UPDATE sync_runs SET
                completed_at = ?1,
                scanned = ?2,
                uploaded = ?3,
                skipped = ?4,
                failed = ?5,
                scan_errors = ?6,
                interrupted = ?7
            WHERE id = ?8
            "#,
            rusqlite::params![
                completed_at,
                stats.scanned as i64,
                stats.uploaded as i64,
                stats.skipped as i64,
                stats.failed as i64,
                stats.scan_errors as i64,
                interrupted,
                run_id,
            ],
        )
        .map_err(StateError::query)?;

        Ok(())
    }

    async fn get_summary(&self) -> Result<IndexSummary, StateError> {
        let conn = self.conn()?;

        let (total_files, total_bytes, last_synced_ts): (i64, i64, Option<i64>) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(file_size), 0), MAX(last_synced_at) FROM file_index",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(StateError::query)?;

        let last_run = conn
            .query_row(
                r#"
                SELECT id, started_at, completed_at, scanned, uploaded, skipped, failed, scan_errors, interrupted
                FROM sync_runs ORDER BY id DESC LIMIT 1
                "#,
                [],
                |row| {
                    Ok(SyncRun {
                        id: row.get(0)?,
                        started_at: timestamp_to_datetime(row.get(1)?),
                        completed_at: row.get::<_, Option<i64>>(2)?.map(timestamp_to_datetime),
                        stats: SyncStats {
                            scanned: row.get::<_, i64>(3)? as u64,
                            uploaded: row.get::<_, i64>(4)? as u64,
                            skipped: row.get::<_, i64>(5)? as u64,
                            failed: row.get::<_, i64>(6)? as u64,
                            scan_errors: row.get::<_, i64>(7)? as u64,
                        },
                        interrupted: row.get(8)?,
                    })
                },
            )
            .optional()
            .map_err(StateError::query)?;

        Ok(IndexSummary {
            total_files: total_files as u64,
            total_bytes: total_bytes as u64,
            last_synced_at: last_synced_ts.map(timestamp_to_datetime),
            last_run,
        })
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Convert a database row to a FileRecord.
fn row_to_file_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        relative_path: row.get(0)?,
        file_size: row.get::<_, i64>(1)? as u64,
        mtime_ns: row.get(2)?,
        sha256: row.get(3)?,
        remote_key: row.get(4)?,
        etag: row.get(5)?,
        last_synced_at: timestamp_to_datetime(row.get(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(path: &str, size: u64, mtime_ns: i64, sha: &str) -> FileRecord {
        FileRecord::new(
            path.to_string(),
            size,
            mtime_ns,
            sha.to_string(),
            format!("photos/{}/{}/{}", &sha[..2], sha, path),
            Some("\"0x8DC\"".to_string()),
        )
    }

    #[tokio::test]
    async fn test_open_creates_db() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.db");
        let db = SqliteStateIndex::open(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path);
    }

    #[tokio::test]
    async fn test_lookup_missing() {
        let db = SqliteStateIndex::open_in_memory().unwrap();
        assert!(db.lookup("a/b.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let db = SqliteStateIndex::open_in_memory().unwrap();
        let rec = record("a/b.jpg", 100, 200, "abcdef");
        db.upsert(&rec).await.unwrap();

        let loaded = db.lookup("a/b.jpg").await.unwrap().unwrap();
        assert_eq!(loaded.sha256, "abcdef");
        assert_eq!(loaded.file_size, 100);
        assert_eq!(loaded.mtime_ns, 200);
        assert_eq!(loaded.remote_key, "photos/ab/abcdef/a/b.jpg");
        assert_eq!(loaded.etag.as_deref(), Some("\"0x8DC\""));
        assert_eq!(loaded.last_synced_at.timestamp(), rec.last_synced_at.timestamp());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_record() {
        let db = SqliteStateIndex::open_in_memory().unwrap();
        db.upsert(&record("a/b.jpg", 100, 200, "abcdef")).await.unwrap();

        let mut newer = record("a/b.jpg", 101, 300, "defabc");
        newer.etag = None;
        db.upsert(&newer).await.unwrap();

        let loaded = db.lookup("a/b.jpg").await.unwrap().unwrap();
        assert_eq!(loaded.sha256, "defabc");
        assert_eq!(loaded.file_size, 101);
        assert_eq!(loaded.mtime_ns, 300);
        assert!(loaded.etag.is_none());

        let summary = db.get_summary().await.unwrap();
        assert_eq!(summary.total_files, 1);
    }

    #[tokio::test]
    async fn test_lookup_by_digest() {
        let db = SqliteStateIndex::open_in_memory().unwrap();
        db.upsert(&record("x/copy.jpg", 5, 1, "2cf24d")).await.unwrap();
        db.upsert(&record("img.jpg", 5, 2, "2cf24d")).await.unwrap();
        db.upsert(&record("other.png", 9, 3, "ffee00")).await.unwrap();

        let dupes = db.lookup_by_digest("2cf24d").await.unwrap();
        let paths: Vec<&str> = dupes.iter().map(|r| r.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["img.jpg", "x/copy.jpg"]);
        assert!(db.lookup_by_digest("000000").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.db");
        {
            let db = SqliteStateIndex::open(&path).await.unwrap();
            db.upsert(&record("keep.mov", 42, 7, "abcdef")).await.unwrap();
        }

        let db = SqliteStateIndex::open(&path).await.unwrap();
        let loaded = db.lookup("keep.mov").await.unwrap().unwrap();
        assert_eq!(loaded.file_size, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(SqliteStateIndex::open(&tmp.path().join("index.db")).await.unwrap());

        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25u64 {
                    let path = format!("w{}/f{}.jpg", worker, i % 5);
                    db.upsert(&record(&path, i, i as i64, "abcdef")).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let summary = db.get_summary().await.unwrap();
        assert_eq!(summary.total_files, 40);
        let last = db.lookup("w3/f4.jpg").await.unwrap().unwrap();
        assert_eq!(last.file_size, 24);
    }

    #[tokio::test]
    async fn test_sync_run_lifecycle() {
        let db = SqliteStateIndex::open_in_memory().unwrap();
        assert!(db.get_summary().await.unwrap().last_run.is_none());

        let run_id = db.start_sync_run().await.unwrap();
        assert!(run_id > 0);

        let stats = SyncStats {
            scanned: 10,
            uploaded: 6,
            skipped: 3,
            failed: 1,
            scan_errors: 2,
        };
        db.complete_sync_run(run_id, &stats, true).await.unwrap();

        let run = db.get_summary().await.unwrap().last_run.unwrap();
        assert_eq!(run.id, run_id);
        assert!(run.completed_at.is_some());
        assert_eq!(run.stats, stats);
        assert!(run.interrupted);
    }

    #[tokio::test]
    async fn test_summary_totals() {
        let db = SqliteStateIndex::open_in_memory().unwrap();
        let empty = db.get_summary().await.unwrap();
        assert_eq!(empty.total_files, 0);
        assert_eq!(empty.total_bytes, 0);
        assert!(empty.last_synced_at.is_none());

        db.upsert(&record("a.jpg", 100, 1, "aaaaaa")).await.unwrap();
        db.upsert(&record("b.jpg", 50, 1, "bbbbbb")).await.unwrap();

        let summary = db.get_summary().await.unwrap();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.total_bytes, 150);
        assert!(summary.last_synced_at.is_some());
    }
}

//! Sync engine. Walks the source tree once per run and uploads every file
//! whose size or mtime differs from the state index.
//!
//! The walk runs on a blocking thread feeding a bounded channel, and index
//! lookups happen one asset at a time as entries arrive. Assets that need
//! work are hashed, uploaded and recorded with at most `workers` units in
//! flight. The run returns only after every submitted unit has finished.

pub mod error;

use std::future::ready;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use futures_util::stream::{self, Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::hash;
use crate::remote::{RemoteKey, RemoteStore, UploadError, DUPLICATE_ETAG};
use crate::retry::{self, RetryAction, RetryConfig};
use crate::scan::{LocalAsset, ScanError, Scanner};
use crate::state::{FileRecord, StateIndex};

pub use error::SyncError;

/// Scanned entries buffered between the walker thread and the engine.
const SCAN_BUFFER: usize = 256;

/// Subset of application config consumed by the sync engine.
/// Decoupled from CLI parsing so the engine can be tested independently.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub(crate) source_dir: PathBuf,
    pub(crate) prefix: String,
    pub(crate) workers: usize,
    pub(crate) dry_run: bool,
    pub(crate) retry: RetryConfig,
    pub(crate) no_progress_bar: bool,
}

impl From<&Config> for SyncConfig {
    fn from(config: &Config) -> Self {
        Self {
            source_dir: config.source_dir.clone(),
            prefix: config.prefix.clone(),
            workers: config.workers as usize,
            dry_run: config.dry_run,
            retry: RetryConfig::default(),
            no_progress_bar: config.no_progress_bar,
        }
    }
}

/// Per-run counters.
///
/// `scanned` counts assets that reached change detection. Entries that
/// failed to stat never get that far and are counted in `scan_errors` only.
/// In dry-run mode `uploaded` means "would be uploaded".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub scanned: u64,
    pub uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub scan_errors: u64,
}

impl SyncStats {
    fn record(&mut self, outcome: AssetOutcome) {
        match outcome {
            AssetOutcome::Skipped => {
                self.scanned += 1;
                self.skipped += 1;
            }
            AssetOutcome::Uploaded => {
                self.scanned += 1;
                self.uploaded += 1;
            }
            AssetOutcome::Failed => {
                self.scanned += 1;
                self.failed += 1;
            }
            AssetOutcome::ScanError => self.scan_errors += 1,
        }
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "scanned={} uploaded={} skipped={} failed={} scan_errors={}",
            self.scanned, self.uploaded, self.skipped, self.failed, self.scan_errors
        )
    }
}

/// Terminal state of one scanned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetOutcome {
    Skipped,
    Uploaded,
    Failed,
    ScanError,
}

/// Change-detection verdict for one scanned entry.
enum Planned {
    Skip,
    Sync(LocalAsset),
    ScanError(ScanError),
}

/// Incremental uploader over an injected store and state index.
pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    state: Arc<dyn StateIndex>,
    config: SyncConfig,
    /// Assets between hash start and record write.
    in_flight: AtomicUsize,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        state: Arc<dyn StateIndex>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            state,
            config,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Run one full pass over the source tree.
    ///
    /// Cancelling `shutdown` stops new assets from being scheduled; units
    /// already in flight finish before the run returns.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<SyncStats> {
        let started = Instant::now();

        if !self.config.dry_run {
            self.store
                .ensure_destination_exists()
                .await
                .context("Failed to prepare destination container")?;
        }

        let run_id = if self.config.dry_run {
            None
        } else {
            Some(self.state.start_sync_run().await?)
        };

        let pb = create_progress_bar(self.config.no_progress_bar);
        let result = self.sync_tree(&pb, &shutdown).await;
        pb.finish_and_clear();
        let stats = result?;

        let interrupted = shutdown.is_cancelled();
        if let Some(run_id) = run_id {
            self.state
                .complete_sync_run(run_id, &stats, interrupted)
                .await?;
        }

        if self.config.dry_run {
            tracing::info!("── Dry Run Summary ──");
            tracing::info!("  {} files would be uploaded", stats.uploaded);
        } else {
            tracing::info!("── Summary ──");
            tracing::info!(
                "  {} uploaded, {} skipped, {} failed, {} scanned",
                stats.uploaded,
                stats.skipped,
                stats.failed,
                stats.scanned
            );
        }
        if stats.scan_errors > 0 {
            tracing::warn!("  {} entries could not be scanned", stats.scan_errors);
        }
        if interrupted {
            tracing::info!("  Interrupted, remaining files will be picked up next run");
        }
        tracing::info!("  elapsed: {}", format_duration(started.elapsed()));

        Ok(stats)
    }

    async fn sync_tree(
        &self,
        pb: &ProgressBar,
        shutdown: &CancellationToken,
    ) -> Result<SyncStats, SyncError> {
        let outcomes = scan_stream(self.config.source_dir.clone())
            .take_while(|_| {
                let cancelled = shutdown.is_cancelled();
                if cancelled {
                    let in_flight = self.in_flight.load(Ordering::SeqCst);
                    pb.suspend(|| {
                        tracing::info!(
                            in_flight,
                            "Stopped scheduling, waiting for {} in-flight uploads",
                            in_flight
                        );
                    });
                }
                ready(!cancelled)
            })
            .then(|item| self.plan(item))
            .map(|planned| self.execute(planned, pb))
            .buffer_unordered(self.config.workers.max(1));

        tokio::pin!(outcomes);

        let mut stats = SyncStats::default();
        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome?;
            stats.record(outcome);
            pb.inc(1);
        }

        Ok(stats)
    }

    /// Decide skip-vs-sync for one scanned entry.
    ///
    /// A file is unchanged iff both size and mtime match the stored record.
    /// Content is not re-hashed for unchanged files.
    async fn plan(&self, item: Result<LocalAsset, ScanError>) -> Result<Planned, SyncError> {
        let asset = match item {
            Ok(asset) => asset,
            Err(e) => return Ok(Planned::ScanError(e)),
        };
        match self.state.lookup(&asset.relative_path).await? {
            Some(record) if record.matches_metadata(asset.size, asset.mtime_ns) => {
                tracing::debug!(path = %asset.relative_path, "Unchanged, skipping");
                Ok(Planned::Skip)
            }
            _ => Ok(Planned::Sync(asset)),
        }
    }

    async fn execute(
        &self,
        planned: Result<Planned, SyncError>,
        pb: &ProgressBar,
    ) -> Result<AssetOutcome, SyncError> {
        match planned? {
            Planned::Skip => Ok(AssetOutcome::Skipped),
            Planned::ScanError(e) => {
                pb.suspend(|| tracing::warn!("Skipping entry: {}", e));
                Ok(AssetOutcome::ScanError)
            }
            Planned::Sync(asset) => {
                pb.set_message(asset.relative_path.clone());
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                let result = self.sync_asset(&asset).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                match result {
                    Ok(()) => Ok(AssetOutcome::Uploaded),
                    Err(e) if e.is_fatal() => Err(e),
                    Err(e) => {
                        pb.suspend(|| {
                            tracing::error!("Sync failed: {}: {}", asset.relative_path, e);
                        });
                        Ok(AssetOutcome::Failed)
                    }
                }
            }
        }
    }

    /// Hash, upload and record a single asset.
    async fn sync_asset(&self, asset: &LocalAsset) -> Result<(), SyncError> {
        let digest = hash::file_sha256_async(asset.path.clone())
            .await
            .map_err(|source| SyncError::Hash {
                path: asset.relative_path.clone(),
                source,
            })?;
        let key = RemoteKey::build(&self.config.prefix, &digest, &asset.relative_path);

        if self.config.dry_run {
            tracing::info!("[DRY RUN] Would upload {} -> {}", asset.relative_path, key);
            return Ok(());
        }

        tracing::debug!(
            size_bytes = asset.size,
            path = %asset.relative_path,
            key = %key,
            "uploading",
        );
        let etag = self.upload_with_retry(asset, &key).await?;

        self.state
            .upsert(&FileRecord::new(
                asset.relative_path.clone(),
                asset.size,
                asset.mtime_ns,
                digest,
                key.into_string(),
                etag,
            ))
            .await?;

        tracing::info!("Uploaded {}", asset.relative_path);
        Ok(())
    }

    /// Upload with backoff on transient failures. An existing object under
    /// the same content-addressed key counts as success.
    async fn upload_with_retry(
        &self,
        asset: &LocalAsset,
        key: &RemoteKey,
    ) -> Result<Option<String>, UploadError> {
        let result = retry::retry_with_backoff(
            &self.config.retry,
            |e: &UploadError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || self.store.upload(&asset.path, key, false),
        )
        .await;

        match result {
            Err(UploadError::AlreadyExists { .. }) => {
                tracing::info!("Blob already exists {}", key);
                Ok(Some(DUPLICATE_ETAG.to_string()))
            }
            other => other,
        }
    }
}

/// Walk `root` on the blocking pool and expose the entries as a stream.
///
/// The walker stops once the receiving side is dropped.
fn scan_stream(root: PathBuf) -> impl Stream<Item = Result<LocalAsset, ScanError>> {
    let (tx, rx) = tokio::sync::mpsc::channel(SCAN_BUFFER);
    tokio::task::spawn_blocking(move || {
        let scanner = Scanner::new(root);
        tracing::debug!(root = %scanner.root().display(), "Scanning source tree");
        for item in scanner.iter() {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

/// Create a spinner with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY, so piped output and cron logs stay clean.
fn create_progress_bar(no_progress_bar: bool) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner} [{elapsed_precise}] {pos} files {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

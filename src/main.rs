//! photosync-rs: incremental photo/video sync into Azure Blob Storage.
//!
//! Walks a local media tree, skips files whose size and mtime match the
//! local state index, and uploads the rest under content-addressed keys with
//! a bounded worker pool. Transient upload failures are retried with
//! exponential backoff; a file is recorded only after its upload succeeds.

#![warn(clippy::all)]

mod cli;
mod config;
mod hash;
mod remote;
pub mod retry;
mod scan;
mod shutdown;
mod state;
mod sync;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Command;
use remote::AzureBlobStore;
use state::{SqliteStateIndex, StateIndex, StateLock};
use sync::{SyncConfig, SyncEngine};

/// Run the sync command.
async fn run_sync(args: cli::SyncArgs) -> anyhow::Result<()> {
    let config = config::Config::from_args(args)?;
    tracing::info!(
        source = %config.source_dir.display(),
        container = %config.container,
        workers = config.workers,
        dry_run = config.dry_run,
        "Starting photosync-rs"
    );
    tracing::debug!(?config, "Resolved configuration");

    let _lock = StateLock::acquire(&config.state_dir).await?;
    let index = SqliteStateIndex::open(&config.index_path()).await?;
    let store = AzureBlobStore::new(
        &config.account_url,
        &config.container,
        config.credential.clone(),
        config.access_tier,
        config.request_timeout,
    )?;

    let engine = SyncEngine::new(
        Arc::new(store),
        Arc::new(index),
        SyncConfig::from(&config),
    );
    let shutdown = shutdown::install_signal_handler()
        .context("Failed to install signal handlers")?;

    let stats = engine.run(shutdown).await?;
    println!("{}", stats);
    Ok(())
}

/// Run the status command.
async fn run_status(args: cli::StatusArgs) -> anyhow::Result<()> {
    let state_dir = config::expand_tilde(&args.state.state_dir);
    let db_path = config::index_path(&state_dir);

    if !db_path.exists() {
        println!("No state index found at {}", db_path.display());
        println!("Run a sync first to create the index.");
        return Ok(());
    }

    let index = SqliteStateIndex::open(&db_path).await?;
    let summary = index.get_summary().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("State Index: {}", db_path.display());
    println!();
    println!("Files:");
    println!("  Synced: {}", summary.total_files);
    println!("  Bytes:  {}", summary.total_bytes);
    if let Some(last) = &summary.last_synced_at {
        println!(
            "  Last upload: {}",
            last.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }

    if let Some(run) = &summary.last_run {
        println!();
        println!("Last run (#{}):", run.id);
        println!(
            "  Started:   {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        match &run.completed_at {
            Some(completed) => println!(
                "  Completed: {}{}",
                completed.format("%Y-%m-%d %H:%M:%S UTC"),
                if run.interrupted { " (interrupted)" } else { "" }
            ),
            None => println!("  Completed: never (aborted)"),
        }
        println!("  {}", run.stats);
    }

    Ok(())
}

/// Run the reset-state command.
async fn run_reset_state(args: cli::ResetStateArgs) -> anyhow::Result<()> {
    let state_dir = config::expand_tilde(&args.state.state_dir);
    let db_path = config::index_path(&state_dir);

    if !db_path.exists() {
        println!("No state index found at {}", db_path.display());
        return Ok(());
    }

    if !args.yes {
        println!("This will delete the state index at:");
        println!("  {}", db_path.display());
        println!("The next sync will hash every file again.");
        println!();
        print!("Are you sure? [y/N] ");
        use std::io::Write;
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(());
        }
    }

    // Refuse while a sync holds the directory.
    let _lock = StateLock::acquire(&state_dir).await?;
    remove_index_files(&db_path)?;
    println!("State index deleted.");
    Ok(())
}

/// Delete the index and its WAL/SHM side files.
fn remove_index_files(db_path: &Path) -> std::io::Result<()> {
    std::fs::remove_file(db_path)?;
    let _ = std::fs::remove_file(db_path.with_extension("db-wal"));
    let _ = std::fs::remove_file(db_path.with_extension("db-shm"));
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .init();

    match cli.command {
        Command::Sync(args) => run_sync(args).await,
        Command::Status(args) => run_status(args).await,
        Command::ResetState(args) => run_reset_state(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_index_files_clears_side_files() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = config::index_path(tmp.path());
        {
            let index = SqliteStateIndex::open(&db_path).await.unwrap();
            index.start_sync_run().await.unwrap();
        }
        std::fs::write(db_path.with_extension("db-wal"), b"").unwrap();

        remove_index_files(&db_path).unwrap();
        assert!(!db_path.exists());
        assert!(!db_path.with_extension("db-wal").exists());
        assert!(!db_path.with_extension("db-shm").exists());
    }

    #[test]
    fn test_remove_index_files_missing_db_errors() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(remove_index_files(&tmp.path().join("index.db")).is_err());
    }
}

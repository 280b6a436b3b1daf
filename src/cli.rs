use clap::{Args, Parser, Subcommand};

use crate::types::{AccessTier, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "photosync-rs",
    version,
    about = "Sync local photo/video assets into Azure Blob Storage safely and incrementally"
)]
pub struct Cli {
    /// Log level
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Enable debug logs (shorthand for --log-level debug)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// The effective tracing filter, with `--verbose` taking precedence.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            LogLevel::Debug.as_filter()
        } else {
            self.log_level.as_filter()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan the source tree and upload new or changed files
    Sync(SyncArgs),
    /// Show a summary of the local state index
    Status(StatusArgs),
    /// Delete the local state index (next sync re-hashes everything)
    ResetState(ResetStateArgs),
}

#[derive(Args, Debug, Clone)]
pub struct StateDirArgs {
    /// Directory holding the state index
    #[arg(long, default_value = "~/.photosync-rs")]
    pub state_dir: String,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Local directory to sync
    #[arg(short = 's', long = "source")]
    pub source_dir: String,

    #[command(flatten)]
    pub state: StateDirArgs,

    /// Storage account URL, e.g. https://myacct.blob.core.windows.net
    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_URL")]
    pub account_url: Option<String>,

    /// Blob container name
    #[arg(long, env = "AZURE_STORAGE_CONTAINER")]
    pub container: Option<String>,

    /// Prefix for uploaded blobs
    #[arg(long, default_value = "photos")]
    pub prefix: String,

    /// Scan and plan uploads without writing to the store or the index
    #[arg(long)]
    pub dry_run: bool,

    /// Concurrent hashing/upload workers (1-32)
    #[arg(long, default_value_t = 4)]
    pub max_workers: u16,

    /// Access tier for uploaded blobs
    #[arg(long, value_enum, default_value = "cool")]
    pub access_tier: AccessTier,

    /// Shared access signature used to authorize requests.
    /// WARNING: passing via --sas-token is visible in process listings.
    /// Prefer the AZURE_STORAGE_SAS_TOKEN environment variable instead.
    #[arg(long, env = "AZURE_STORAGE_SAS_TOKEN", hide_env_values = true)]
    pub sas_token: Option<String>,

    /// OAuth bearer token used to authorize requests
    #[arg(long, env = "AZURE_STORAGE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Per-request timeout for store calls, in seconds. Files over 8 MiB are
    /// sent as separate 8 MiB blocks, each its own request
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub state: StateDirArgs,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResetStateArgs {
    #[command(flatten)]
    pub state: StateDirArgs,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_defaults() {
        let cli = Cli::try_parse_from(["photosync-rs", "sync", "--source", "/photos"]).unwrap();
        let Command::Sync(args) = cli.command else {
            panic!("expected sync command");
        };
        assert_eq!(args.source_dir, "/photos");
        assert_eq!(args.state.state_dir, "~/.photosync-rs");
        assert_eq!(args.prefix, "photos");
        assert_eq!(args.max_workers, 4);
        assert_eq!(args.access_tier, AccessTier::Cool);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_verbose_overrides_log_level() {
        let cli = Cli::try_parse_from([
            "photosync-rs",
            "--log-level",
            "error",
            "-v",
            "status",
        ])
        .unwrap();
        assert_eq!(cli.log_filter(), "debug");
    }

    #[test]
    fn test_sync_requires_source() {
        assert!(Cli::try_parse_from(["photosync-rs", "sync"]).is_err());
    }

    #[test]
    fn test_reset_state_yes_flag() {
        let cli =
            Cli::try_parse_from(["photosync-rs", "reset-state", "--yes", "--state-dir", "/s"])
                .unwrap();
        let Command::ResetState(args) = cli.command else {
            panic!("expected reset-state command");
        };
        assert!(args.yes);
        assert_eq!(args.state.state_dir, "/s");
    }
}

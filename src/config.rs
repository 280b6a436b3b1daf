use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::cli::SyncArgs;
use crate::types::AccessTier;

/// File name of the state index inside the state directory.
pub const INDEX_FILENAME: &str = "index.db";

/// Upper bound on `--max-workers`.
pub const MAX_WORKERS: u16 = 32;

/// Raised when configuration is invalid. Always fatal, before any scanning.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Source directory does not exist or is not a directory: {0}")]
    SourceNotDirectory(PathBuf),

    #[error("Failed to create state directory {path}: {source}")]
    StateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Account URL is required. Pass --account-url or set AZURE_STORAGE_ACCOUNT_URL")]
    MissingAccountUrl,

    #[error("Account URL must start with https:// or http://, got '{0}'")]
    InvalidAccountUrl(String),

    #[error("Container is required. Pass --container or set AZURE_STORAGE_CONTAINER")]
    MissingContainer,

    #[error("--max-workers must be between 1 and {MAX_WORKERS}, got {0}")]
    WorkersOutOfRange(u16),

    #[error(
        "A credential is required. Pass --sas-token / --access-token or set \
         AZURE_STORAGE_SAS_TOKEN / AZURE_STORAGE_ACCESS_TOKEN"
    )]
    MissingCredential,
}

/// How requests to the blob service are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Shared access signature appended to every request URL.
    Sas(String),
    /// OAuth 2.0 bearer token sent in the `Authorization` header.
    Bearer(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Sas(_) => f.write_str("Sas(<redacted>)"),
            Credential::Bearer(_) => f.write_str("Bearer(<redacted>)"),
        }
    }
}

/// Validated configuration for a sync run.
pub struct Config {
    pub source_dir: PathBuf,
    pub state_dir: PathBuf,
    pub account_url: String,
    pub container: String,
    pub prefix: String,
    pub credential: Option<Credential>,
    pub request_timeout: Duration,
    pub workers: u16,
    pub access_tier: AccessTier,
    pub dry_run: bool,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("source_dir", &self.source_dir)
            .field("state_dir", &self.state_dir)
            .field("account_url", &self.account_url)
            .field("container", &self.container)
            .field("prefix", &self.prefix)
            .field("credential", &self.credential)
            .field("workers", &self.workers)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// Expand ~ to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Path of the state index for a state directory.
pub(crate) fn index_path(state_dir: &Path) -> PathBuf {
    state_dir.join(INDEX_FILENAME)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_args(args: SyncArgs) -> Result<Self, ConfigError> {
        let source_dir = expand_tilde(&args.source_dir);
        if !source_dir.is_dir() {
            return Err(ConfigError::SourceNotDirectory(source_dir));
        }
        let source_dir = source_dir.canonicalize().unwrap_or(source_dir);

        let state_dir = expand_tilde(&args.state.state_dir);
        std::fs::create_dir_all(&state_dir).map_err(|source| ConfigError::StateDir {
            path: state_dir.clone(),
            source,
        })?;

        let account_url = non_empty(args.account_url).ok_or(ConfigError::MissingAccountUrl)?;
        if !(account_url.starts_with("https://") || account_url.starts_with("http://")) {
            return Err(ConfigError::InvalidAccountUrl(account_url));
        }
        let account_url = account_url.trim_end_matches('/').to_string();

        let container = non_empty(args.container).ok_or(ConfigError::MissingContainer)?;

        if args.max_workers < 1 || args.max_workers > MAX_WORKERS {
            return Err(ConfigError::WorkersOutOfRange(args.max_workers));
        }

        let credential = match (non_empty(args.sas_token), non_empty(args.access_token)) {
            (Some(sas), _) => Some(Credential::Sas(sas.trim_start_matches('?').to_string())),
            (None, Some(token)) => Some(Credential::Bearer(token)),
            (None, None) => None,
        };
        if credential.is_none() && !args.dry_run {
            return Err(ConfigError::MissingCredential);
        }

        Ok(Self {
            source_dir,
            state_dir,
            account_url,
            container,
            prefix: args.prefix.trim_matches('/').to_string(),
            credential,
            request_timeout: Duration::from_secs(args.timeout.max(1)),
            workers: args.max_workers,
            access_tier: args.access_tier,
            dry_run: args.dry_run,
            no_progress_bar: args.no_progress_bar,
        })
    }

    pub fn index_path(&self) -> PathBuf {
        index_path(&self.state_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::StateDirArgs;

    fn make_args(source: &Path, state: &Path, overrides: impl FnOnce(&mut SyncArgs)) -> SyncArgs {
        let mut args = SyncArgs {
            source_dir: source.display().to_string(),
            state: StateDirArgs {
                state_dir: state.display().to_string(),
            },
            account_url: Some("https://acct.blob.core.windows.net/".to_string()),
            container: Some("media".to_string()),
            prefix: "/photos/".to_string(),
            dry_run: false,
            max_workers: 4,
            access_tier: AccessTier::Cool,
            sas_token: Some("?sv=2023&sig=abc".to_string()),
            access_token: None,
            timeout: 600,
            no_progress_bar: true,
        };
        overrides(&mut args);
        args
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Pictures");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Pictures"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(expand_tilde("/absolute/path"), PathBuf::from("/absolute/path"));
        assert_eq!(expand_tilde("relative/path"), PathBuf::from("relative/path"));
    }

    #[test]
    fn test_from_args_normalizes_values() {
        let tmp = tempfile::tempdir().unwrap();
        let state = tmp.path().join("state");
        let cfg = Config::from_args(make_args(tmp.path(), &state, |_| {})).unwrap();

        assert_eq!(cfg.account_url, "https://acct.blob.core.windows.net");
        assert_eq!(cfg.prefix, "photos");
        assert_eq!(
            cfg.credential,
            Some(Credential::Sas("sv=2023&sig=abc".to_string()))
        );
        assert!(state.is_dir());
        assert_eq!(cfg.index_path(), state.join(INDEX_FILENAME));
    }

    #[test]
    fn test_from_args_requires_source() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing");
        let err = Config::from_args(make_args(&missing, tmp.path(), |_| {})).unwrap_err();
        assert!(matches!(err, ConfigError::SourceNotDirectory(_)));
    }

    #[test]
    fn test_from_args_rejects_file_as_source() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("img.jpg");
        std::fs::write(&file, b"x").unwrap();
        let err = Config::from_args(make_args(&file, tmp.path(), |_| {})).unwrap_err();
        assert!(matches!(err, ConfigError::SourceNotDirectory(_)));
    }

    #[test]
    fn test_from_args_requires_account_url_and_container() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::from_args(make_args(tmp.path(), tmp.path(), |a| {
            a.account_url = Some("  ".to_string())
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingAccountUrl));

        let err = Config::from_args(make_args(tmp.path(), tmp.path(), |a| a.container = None))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingContainer));
    }

    #[test]
    fn test_from_args_rejects_bad_scheme() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::from_args(make_args(tmp.path(), tmp.path(), |a| {
            a.account_url = Some("ftp://acct".to_string())
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAccountUrl(_)));
    }

    #[test]
    fn test_from_args_worker_range() {
        let tmp = tempfile::tempdir().unwrap();
        for bad in [0u16, 33] {
            let err = Config::from_args(make_args(tmp.path(), tmp.path(), |a| a.max_workers = bad))
                .unwrap_err();
            assert!(matches!(err, ConfigError::WorkersOutOfRange(n) if n == bad));
        }
        for good in [1u16, 32] {
            let cfg = Config::from_args(make_args(tmp.path(), tmp.path(), |a| a.max_workers = good))
                .unwrap();
            assert_eq!(cfg.workers, good);
        }
    }

    #[test]
    fn test_from_args_credential_required_outside_dry_run() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::from_args(make_args(tmp.path(), tmp.path(), |a| a.sas_token = None))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential));

        let cfg = Config::from_args(make_args(tmp.path(), tmp.path(), |a| {
            a.sas_token = None;
            a.dry_run = true;
        }))
        .unwrap();
        assert!(cfg.credential.is_none());
        assert!(cfg.dry_run);
    }

    #[test]
    fn test_from_args_bearer_token() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::from_args(make_args(tmp.path(), tmp.path(), |a| {
            a.sas_token = None;
            a.access_token = Some("eyJ0".to_string());
        }))
        .unwrap();
        assert_eq!(cfg.credential, Some(Credential::Bearer("eyJ0".to_string())));
    }

    #[test]
    fn test_debug_redacts_credential() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = Config::from_args(make_args(tmp.path(), tmp.path(), |_| {})).unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("sig=abc"));
        assert!(rendered.contains("<redacted>"));
    }
}

//! Advisory lock on a state directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use super::error::StateError;

/// File name of the lock inside the state directory.
pub const LOCK_FILENAME: &str = "index.lock";

/// Exclusive lock held for the duration of a sync run, so two processes
/// never drive the same index at once. Released when dropped.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
    path: PathBuf,
}

impl StateLock {
    pub async fn acquire(state_dir: &Path) -> Result<Self, StateError> {
        let path = state_dir.join(LOCK_FILENAME);
        tokio::task::spawn_blocking(move || {
            let file = File::create(&path).map_err(|source| StateError::LockFile {
                path: path.clone(),
                source,
            })?;
            file.try_lock_exclusive()
                .map_err(|_| StateError::Locked(path.clone()))?;
            tracing::debug!(path = %path.display(), "Acquired state lock");
            Ok(Self { _file: file, path })
        })
        .await?
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_lock_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let first = StateLock::acquire(tmp.path()).await.unwrap();
        assert_eq!(first.path(), tmp.path().join(LOCK_FILENAME));

        let second = StateLock::acquire(tmp.path()).await;
        assert!(matches!(second, Err(StateError::Locked(_))));
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        drop(StateLock::acquire(tmp.path()).await.unwrap());
        assert!(StateLock::acquire(tmp.path()).await.is_ok());
    }
}

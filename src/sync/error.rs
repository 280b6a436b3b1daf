use thiserror::Error;

use crate::remote::UploadError;
use crate::state::StateError;

/// Why a single asset's pipeline stopped.
///
/// Only `State` is fatal to the run; the others are isolated to the asset
/// and counted as failed.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to hash {path}: {source}")]
    Hash {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::State(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_state_errors_are_fatal() {
        let hash = SyncError::Hash {
            path: "a.jpg".into(),
            source: std::io::Error::other("gone"),
        };
        assert!(!hash.is_fatal());

        let upload = SyncError::Upload(UploadError::Fatal {
            key: "k".into(),
            message: "403".into(),
        });
        assert!(!upload.is_fatal());

        let state = SyncError::State(StateError::Query("disk full".into()));
        assert!(state.is_fatal());
    }
}

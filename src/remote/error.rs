use thiserror::Error;

/// Upload failures, classified at the adapter boundary.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The destination already holds this exact key. Because keys are
    /// content-addressed, callers treat this as success.
    #[error("Object already exists: {key}")]
    AlreadyExists { key: String },

    /// Likely to succeed on retry (network blip, throttling, 5xx).
    #[error("Transient failure uploading {key}: {message}")]
    Transient { key: String, message: String },

    /// Will not succeed on retry.
    #[error("Upload of {key} failed: {message}")]
    Fatal { key: String, message: String },
}

impl UploadError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Transient { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        let key = "photos/2c/2cf2/img.jpg".to_string();
        assert!(UploadError::Transient {
            key: key.clone(),
            message: "503".into()
        }
        .is_retryable());
        assert!(!UploadError::Fatal {
            key: key.clone(),
            message: "403".into()
        }
        .is_retryable());
        assert!(!UploadError::AlreadyExists { key }.is_retryable());
    }
}

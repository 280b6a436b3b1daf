//! Remote object store boundary.
//!
//! The sync engine only sees [`RemoteStore`]; adapters map their native
//! failures onto the three-way [`UploadError`] taxonomy so retry decisions
//! are a plain match on data.

pub mod azure;
pub mod error;
pub mod key;

use std::path::Path;

use async_trait::async_trait;

pub use azure::AzureBlobStore;
pub use error::UploadError;
pub use key::RemoteKey;

/// Integrity token recorded when the store reports the key already exists
/// and returns no fresh etag.
pub const DUPLICATE_ETAG: &str = "existing";

/// An object store that accepts content-addressed uploads.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Idempotently create the destination container if it is missing.
    async fn ensure_destination_exists(&self) -> anyhow::Result<()>;

    /// Stream the file at `source` to `key`.
    ///
    /// With `overwrite == false` an existing object is never replaced and
    /// the call fails with [`UploadError::AlreadyExists`]. Returns the
    /// store's integrity token when it provides one.
    async fn upload(
        &self,
        source: &Path,
        key: &RemoteKey,
        overwrite: bool,
    ) -> Result<Option<String>, UploadError>;
}

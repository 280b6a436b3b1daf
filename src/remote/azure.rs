//! Azure Blob Storage adapter over the REST API.
//!
//! Files up to one block are written with a single Put Blob request whose
//! body streams from disk. Larger files are staged as fixed-size blocks and
//! committed with Put Block List, so no single request grows with the file.
//! The write that creates the blob carries `If-None-Match: *`, so a key that
//! already exists is reported instead of replaced.

use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use url::Url;

use super::error::UploadError;
use super::key::RemoteKey;
use super::RemoteStore;
use crate::config::Credential;
use crate::types::AccessTier;

/// REST API version; 2021-12-02 or later is needed for the Cold tier.
const API_VERSION: &str = "2023-11-03";

const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// Block size for staged uploads. Files no larger than this go in one
/// Put Blob request.
pub const DEFAULT_BLOCK_SIZE: u64 = 8 * 1024 * 1024;

/// Blocks of one blob staged concurrently.
const BLOCK_CONCURRENCY: usize = 4;

/// Service limit on committed blocks per blob.
const MAX_BLOCKS: u64 = 50_000;

pub struct AzureBlobStore {
    client: Client,
    account_url: Url,
    container: String,
    credential: Option<Credential>,
    access_tier: AccessTier,
    block_size: u64,
}

impl std::fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("account_url", &self.account_url.as_str())
            .field("container", &self.container)
            .field("credential", &self.credential)
            .field("access_tier", &self.access_tier)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

impl AzureBlobStore {
    /// `timeout` bounds each HTTP request. A request carries at most one
    /// block of data, so the bound holds for files of any size.
    pub fn new(
        account_url: &str,
        container: &str,
        credential: Option<Credential>,
        access_tier: AccessTier,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let account_url = Url::parse(account_url)
            .with_context(|| format!("Invalid account URL: {}", account_url))?;
        if account_url.cannot_be_a_base() {
            anyhow::bail!("Account URL cannot carry a path: {}", account_url);
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            account_url,
            container: container.to_string(),
            credential,
            access_tier,
            block_size: DEFAULT_BLOCK_SIZE,
        })
    }

    #[cfg(test)]
    fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    fn container_url(&self) -> Url {
        let mut url = self.account_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.container);
        }
        let query = match &self.credential {
            Some(Credential::Sas(sas)) => format!("restype=container&{}", sas),
            _ => "restype=container".to_string(),
        };
        url.set_query(Some(&query));
        url
    }

    /// Full URL of a blob. Each `/`-separated key segment is percent-encoded.
    pub(crate) fn blob_url(&self, key: &RemoteKey) -> Url {
        let mut url = self.account_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&self.container)
                .extend(key.as_str().split('/'));
        }
        if let Some(Credential::Sas(sas)) = &self.credential {
            url.set_query(Some(sas));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header("x-ms-version", API_VERSION)
            .header("x-ms-date", http_date());
        match &self.credential {
            Some(Credential::Bearer(token)) => request.bearer_auth(token),
            _ => request,
        }
    }
}

fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Block ids must have equal length within a blob; six digits covers
/// [`MAX_BLOCKS`].
pub(crate) fn block_id(index: u64) -> String {
    BASE64.encode(format!("{:06}", index))
}

pub(crate) fn block_list_xml(ids: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in ids {
        xml.push_str("<Latest>");
        xml.push_str(id);
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

fn etag_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn error_code(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ERROR_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Map an unsuccessful Put Blob response onto the upload taxonomy.
pub(crate) fn classify_status(key: &str, status: u16, error_code: Option<&str>) -> UploadError {
    let message = match error_code {
        Some(code) => format!("HTTP {} ({})", status, code),
        None => format!("HTTP {}", status),
    };
    match status {
        // 412 is the If-None-Match precondition losing a race
        409 if error_code.is_none() || error_code == Some("BlobAlreadyExists") => {
            UploadError::AlreadyExists { key: key.to_string() }
        }
        412 => UploadError::AlreadyExists { key: key.to_string() },
        408 | 429 | 500 | 502 | 503 | 504 => UploadError::Transient {
            key: key.to_string(),
            message,
        },
        _ => UploadError::Fatal {
            key: key.to_string(),
            message,
        },
    }
}

/// Map a transport-level failure onto the upload taxonomy.
fn classify_transport(key: &str, err: reqwest::Error) -> UploadError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        UploadError::Transient {
            key: key.to_string(),
            message: err.to_string(),
        }
    } else {
        UploadError::Fatal {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for AzureBlobStore {
    async fn ensure_destination_exists(&self) -> anyhow::Result<()> {
        let url = self.container_url();

        let response = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .with_context(|| format!("Failed to query container '{}'", self.container))?;
        if response.status().is_success() {
            tracing::debug!(container = %self.container, "Container exists");
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            anyhow::bail!(
                "Failed to query container '{}': HTTP {} ({})",
                self.container,
                response.status().as_u16(),
                error_code(&response).unwrap_or_default()
            );
        }

        let response = self
            .authorize(self.client.put(url))
            .header(CONTENT_LENGTH, 0)
            .send()
            .await
            .with_context(|| format!("Failed to create container '{}'", self.container))?;
        let status = response.status();
        let code = error_code(&response);
        if status.is_success() {
            tracing::info!(container = %self.container, "Created container");
            Ok(())
        } else if status == StatusCode::CONFLICT
            && code.as_deref() == Some("ContainerAlreadyExists")
        {
            tracing::debug!(container = %self.container, "Container created concurrently");
            Ok(())
        } else {
            anyhow::bail!(
                "Failed to create container '{}': HTTP {} ({})",
                self.container,
                status.as_u16(),
                code.unwrap_or_default()
            )
        }
    }

    async fn upload(
        &self,
        source: &Path,
        key: &RemoteKey,
        overwrite: bool,
    ) -> Result<Option<String>, UploadError> {
        let file = tokio::fs::File::open(source)
            .await
            .map_err(|e| local_error(key, source, "open", e))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| local_error(key, source, "stat", e))?
            .len();
        let content_type = mime_guess::from_path(source)
            .first_or_octet_stream()
            .to_string();

        let etag = if len <= self.block_size {
            self.put_blob(file, key, len, &content_type, overwrite)
                .await?
        } else {
            drop(file);
            self.put_blocks(source, key, len, &content_type, overwrite)
                .await?
        };
        tracing::debug!(key = %key, size_bytes = len, etag = ?etag, "Put blob");
        Ok(etag)
    }
}

fn local_error(key: &RemoteKey, source: &Path, op: &str, err: std::io::Error) -> UploadError {
    UploadError::Fatal {
        key: key.to_string(),
        message: format!("Failed to {} {}: {}", op, source.display(), err),
    }
}

impl AzureBlobStore {
    async fn send(&self, key: &RemoteKey, request: RequestBuilder) -> Result<Response, UploadError> {
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(key.as_str(), e))?;
        let status = response.status();
        if !status.is_success() {
            let code = error_code(&response);
            return Err(classify_status(key.as_str(), status.as_u16(), code.as_deref()));
        }
        Ok(response)
    }

    async fn put_blob(
        &self,
        file: tokio::fs::File,
        key: &RemoteKey,
        len: u64,
        content_type: &str,
        overwrite: bool,
    ) -> Result<Option<String>, UploadError> {
        let mut request = self
            .authorize(self.client.put(self.blob_url(key)))
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-access-tier", self.access_tier.as_header_value())
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, len)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)));
        if !overwrite {
            request = request.header(IF_NONE_MATCH, "*");
        }
        let response = self.send(key, request).await?;
        Ok(etag_of(&response))
    }

    /// Stage every block, then commit the list. Uncommitted blocks left by a
    /// failed attempt are replaced by the next attempt's blocks of the same id.
    async fn put_blocks(
        &self,
        source: &Path,
        key: &RemoteKey,
        len: u64,
        content_type: &str,
        overwrite: bool,
    ) -> Result<Option<String>, UploadError> {
        let block_count = len.div_ceil(self.block_size);
        if block_count > MAX_BLOCKS {
            return Err(UploadError::Fatal {
                key: key.to_string(),
                message: format!(
                    "{} bytes needs {} blocks, service limit is {}",
                    len, block_count, MAX_BLOCKS
                ),
            });
        }
        let ids: Vec<String> = (0..block_count).map(block_id).collect();
        tracing::debug!(key = %key, blocks = block_count, "Staging blocks");

        let mut staged = stream::iter(0..ids.len())
            .map(|index| {
                let id = ids[index].as_str();
                let offset = index as u64 * self.block_size;
                let size = self.block_size.min(len - offset);
                self.put_block(source, key, id, offset, size)
            })
            .buffer_unordered(BLOCK_CONCURRENCY);
        while let Some(result) = staged.next().await {
            result?;
        }
        drop(staged);

        let body = block_list_xml(&ids);
        let mut url = self.blob_url(key);
        url.query_pairs_mut().append_pair("comp", "blocklist");
        let mut request = self
            .authorize(self.client.put(url))
            .header("x-ms-blob-content-type", content_type)
            .header("x-ms-access-tier", self.access_tier.as_header_value())
            .header(CONTENT_TYPE, "application/xml")
            .header(CONTENT_LENGTH, body.len())
            .body(body);
        if !overwrite {
            request = request.header(IF_NONE_MATCH, "*");
        }
        let response = self.send(key, request).await?;
        Ok(etag_of(&response))
    }

    async fn put_block(
        &self,
        source: &Path,
        key: &RemoteKey,
        id: &str,
        offset: u64,
        size: u64,
    ) -> Result<(), UploadError> {
        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|e| local_error(key, source, "open", e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| local_error(key, source, "seek", e))?;

        let mut url = self.blob_url(key);
        url.query_pairs_mut()
            .append_pair("comp", "block")
            .append_pair("blockid", id);
        let request = self
            .authorize(self.client.put(url))
            .header(CONTENT_LENGTH, size)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file.take(size))));
        self.send(key, request).await?;
        Ok(())
    }
}

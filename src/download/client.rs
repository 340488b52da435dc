//! HTTP client wrapper for fetching metadata and archives.
//!
//! This module provides the `HttpClient` struct which streams response bodies
//! either into memory or into a destination file, reporting transfer events
//! as chunks arrive.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{HeaderName, HeaderValue};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, PARTIAL_SUFFIX, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use super::transport::{FetchOutput, TransferEvent};
use crate::user_agent;

/// HTTP client shared by every fetch in a run.
///
/// This client is designed to be created once and reused, taking advantage
/// of connection pooling; clones share the same pool.
///
/// # Example
///
/// ```no_run
/// use std::collections::BTreeMap;
/// use prefetcher_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let output = client
///     .fetch("https://repo.packagist.org/packages.json", &BTreeMap::new(), None, &mut |_| {})
///     .await?;
/// println!("{} bytes", output.as_bytes().map_or(0, <[u8]>::len));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        Self::try_new_with_timeouts(connect_timeout_secs, read_timeout_secs)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a new HTTP client, returning the builder error instead of panicking.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`reqwest::Error`] when the TLS backend or
    /// system configuration cannot be initialized.
    pub fn try_new_with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .read_timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Fetches `url`, streaming the body to `destination` when given.
    ///
    /// File downloads are written to `<destination>.part` and renamed into
    /// place once the body is complete, so an interrupted transfer never
    /// leaves a truncated file where a reader expects a finished one.
    ///
    /// `on_event` receives [`TransferEvent::FileSize`] once when the server
    /// announces a length, then [`TransferEvent::Progress`] per chunk.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The URL is invalid or not http(s)
    /// - A header cannot be encoded
    /// - The request fails (network error, timeout)
    /// - The server returns an error status (4xx, 5xx)
    /// - Writing to disk fails
    #[instrument(skip(self, headers, on_event), fields(url = %url))]
    pub async fn fetch(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        destination: Option<&Path>,
        on_event: &mut (dyn FnMut(TransferEvent) + Send),
    ) -> Result<FetchOutput, DownloadError> {
        debug!("starting fetch");

        let parsed = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_url(url));
        }

        let mut request = self.client.get(parsed);
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| DownloadError::invalid_header(url, name))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| DownloadError::invalid_header(url, name))?;
            request = request.header(header_name, header_value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            on_event(TransferEvent::FileSize(length));
        }

        match destination {
            None => {
                let body = stream_to_memory(response, url, on_event).await?;
                debug!(bytes = body.len(), "fetch complete");
                Ok(FetchOutput::Bytes(Arc::from(body)))
            }
            Some(path) => {
                let written = stream_to_destination(response, url, path, on_event).await?;
                debug!(path = %path.display(), bytes = written, "fetch complete");
                Ok(FetchOutput::File(path.to_path_buf()))
            }
        }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Path the body streams into before being renamed to `path`.
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

async fn stream_to_memory(
    response: reqwest::Response,
    url: &str,
    on_event: &mut (dyn FnMut(TransferEvent) + Send),
) -> Result<Vec<u8>, DownloadError> {
    let capacity = response
        .content_length()
        .and_then(|len| usize::try_from(len).ok())
        .unwrap_or(0);
    let mut body = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();
    let mut transferred: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;
        body.extend_from_slice(&chunk);
        let delta = chunk.len() as u64;
        transferred += delta;
        on_event(TransferEvent::Progress { delta, transferred });
    }

    Ok(body)
}

/// Streams into the `.part` file, then renames it; the partial file is
/// removed on any failure.
async fn stream_to_destination(
    response: reqwest::Response,
    url: &str,
    path: &Path,
    on_event: &mut (dyn FnMut(TransferEvent) + Send),
) -> Result<u64, DownloadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    let part = partial_path(path);
    let file = File::create(&part)
        .await
        .map_err(|e| DownloadError::io(part.clone(), e))?;

    let result = stream_to_file(file, response, url, &part, on_event).await;
    let written = match result {
        Ok(written) => written,
        Err(error) => {
            debug!(path = %part.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(&part).await;
            return Err(error);
        }
    };

    if let Err(e) = tokio::fs::rename(&part, path).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(DownloadError::io(path, e));
    }
    Ok(written)
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
    on_event: &mut (dyn FnMut(TransferEvent) + Send),
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

        let delta = chunk.len() as u64;
        bytes_written += delta;
        on_event(TransferEvent::Progress {
            delta,
            transferred: bytes_written,
        });
    }

    // Ensure all data is flushed to disk
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path.to_path_buf(), e))?;

    Ok(bytes_written)
}

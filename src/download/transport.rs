//! Transport-facing types shared by the client, the scheduler and the
//! repository adapters.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::error::DownloadError;

/// Progress notification emitted while a body is being received.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEvent {
    /// The total size of this transfer became known. Emitted at most once.
    FileSize(u64),
    /// A chunk arrived.
    Progress {
        /// Bytes received in this chunk.
        delta: u64,
        /// Bytes received so far for this transfer.
        transferred: u64,
    },
}

/// Result of one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutput {
    /// Body held in memory.
    Bytes(Arc<[u8]>),
    /// Body written to this file.
    File(PathBuf),
}

impl FetchOutput {
    /// Returns the in-memory body, if any.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::File(_) => None,
        }
    }

    /// Returns the written file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Bytes(_) => None,
            Self::File(path) => Some(path),
        }
    }
}

/// Per-fetch knobs.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Stream the body to this file instead of returning it.
    pub destination: Option<PathBuf>,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Whether this fetch contributes to a visible progress display.
    pub show_progress: bool,
}

impl FetchOptions {
    /// Options for an in-memory fetch without progress output.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }
}

/// Something that can fetch a URL.
///
/// Implemented by the scheduler (standalone fetches) and by the per-item
/// context handed to request handlers (fetches inside a batch, with shared
/// progress accounting). Repository adapters depend only on this trait.
#[async_trait]
pub trait RemoteFetch: Send + Sync {
    /// Fetches `url` on behalf of `host`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] for transport, HTTP status and file system
    /// failures.
    async fn fetch(
        &self,
        host: &str,
        url: &str,
        options: FetchOptions,
    ) -> Result<FetchOutput, DownloadError>;
}

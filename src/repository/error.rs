//! Error types for repository metadata access.

use thiserror::Error;

use crate::cache::CacheError;
use crate::download::DownloadError;

/// Errors raised while loading repository metadata.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The metadata file could not be fetched.
    #[error("failed to fetch {url}: {source}")]
    Download {
        /// The metadata URL.
        url: String,
        /// The transport error.
        #[source]
        source: DownloadError,
    },

    /// The fetched bytes do not match the advertised checksum.
    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The metadata URL.
        url: String,
        /// SHA-256 advertised by the repository.
        expected: String,
        /// SHA-256 of the received bytes.
        actual: String,
    },

    /// The metadata file is not valid JSON.
    #[error("invalid JSON in {url}: {source}")]
    InvalidJson {
        /// The metadata URL.
        url: String,
        /// The decode error.
        #[source]
        source: serde_json::Error,
    },

    /// The repository URL cannot be used as a base for metadata URLs.
    #[error("invalid repository URL: {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// The artifact cache failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl RepositoryError {
    /// Creates a download error.
    pub fn download(url: impl Into<String>, source: DownloadError) -> Self {
        Self::Download {
            url: url.into(),
            source,
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(
        url: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            url: url.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an invalid JSON error.
    pub fn invalid_json(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidJson {
            url: url.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }
}

//! Error types for the on-disk caches.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by [`ArtifactCache`](super::ArtifactCache) implementations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing a cache file failed.
    #[error("cache IO error at {path}: {source}")]
    Io {
        /// The cache file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file identifier would escape the cache directory or is empty.
    #[error("invalid cache file id \"{file_id}\"")]
    InvalidKey {
        /// The rejected identifier.
        file_id: String,
    },
}

impl CacheError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(file_id: impl Into<String>) -> Self {
        Self::InvalidKey {
            file_id: file_id.into(),
        }
    }
}

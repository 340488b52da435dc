//! On-disk artifact cache.
//!
//! The cache maps file identifiers (`acme/widget/<hash>.zip`,
//! `provider-acme$widget.json`) to files under a root directory. The
//! prefetcher and the installer both derive archive identifiers through
//! [`ArtifactCache::cache_key`], so a prefetched file lands exactly where the
//! installer later looks for it.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use super::error::CacheError;

/// Characters kept verbatim in file identifiers; anything else becomes `-`.
fn is_allowed(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '/' | '-' | '$' | '~')
}

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Minimal cache interface the prefetcher and repositories depend on.
pub trait ArtifactCache: Send + Sync {
    /// Reads a cached file; `Ok(None)` on a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] for invalid identifiers and IO failures other
    /// than "not found".
    fn read(&self, file_id: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `contents` under `file_id`, replacing any previous file.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] for invalid identifiers and IO failures.
    fn write(&self, file_id: &str, contents: &[u8]) -> Result<(), CacheError>;

    /// Absolute location of `file_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidKey`] when the identifier would escape the
    /// cache root.
    fn path_for(&self, file_id: &str) -> Result<PathBuf, CacheError>;

    /// Canonical identifier of a distribution archive:
    /// `{package}/{sha256(processed_url)}.{dist_type}`.
    fn cache_key(&self, package: &str, processed_url: &str, dist_type: &str) -> String {
        format!("{package}/{}.{dist_type}", sha256_hex(processed_url.as_bytes()))
    }

    /// Reads `file_id` only if its stored bytes hash to `sha256`.
    ///
    /// A checksum mismatch is treated as a miss so the caller refetches.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] for invalid identifiers and IO failures.
    fn read_verified(&self, file_id: &str, sha256: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(raw) = self.read(file_id)? else {
            return Ok(None);
        };
        if !sha256_hex(&raw).eq_ignore_ascii_case(sha256) {
            debug!(file_id, "cached file checksum mismatch, ignoring entry");
            return Ok(None);
        }
        Ok(Some(raw))
    }

    /// Returns `true` when `file_id` is present on disk.
    fn contains(&self, file_id: &str) -> bool {
        self.path_for(file_id).is_ok_and(|path| path.is_file())
    }

    /// Writes `contents` unless the cached file already holds exactly them.
    ///
    /// Returns whether a write happened.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] for invalid identifiers and IO failures.
    fn write_if_changed(&self, file_id: &str, contents: &[u8]) -> Result<bool, CacheError> {
        if self.read(file_id)?.as_deref() == Some(contents) {
            return Ok(false);
        }
        self.write(file_id, contents)?;
        Ok(true)
    }
}

/// [`ArtifactCache`] backed by a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Creates a cache rooted at `root`; the directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Replaces disallowed characters and rejects identifiers that are empty or
/// contain `.`/`..` segments.
fn sanitize(file_id: &str) -> Result<String, CacheError> {
    let cleaned: String = file_id
        .trim_start_matches('/')
        .chars()
        .map(|ch| if is_allowed(ch) { ch } else { '-' })
        .collect();
    let escapes = cleaned
        .split('/')
        .any(|segment| segment == "." || segment == "..");
    if cleaned.is_empty() || escapes {
        return Err(CacheError::invalid_key(file_id));
    }
    Ok(cleaned)
}

impl ArtifactCache for FileCache {
    fn read(&self, file_id: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(file_id)?;
        match std::fs::read(&path) {
            Ok(contents) => {
                debug!(file_id, path = %path.display(), "cache hit");
                Ok(Some(contents))
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(CacheError::io(path, error)),
        }
    }

    fn write(&self, file_id: &str, contents: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(file_id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }

        // Write next to the target and rename so readers never see half a file.
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".tmp-{}", std::process::id()));
        let tmp = path.with_file_name(tmp_name);
        std::fs::write(&tmp, contents).map_err(|e| CacheError::io(tmp.clone(), e))?;
        if let Err(error) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(CacheError::io(path, error));
        }
        debug!(file_id, bytes = contents.len(), "cache write");
        Ok(())
    }

    fn path_for(&self, file_id: &str) -> Result<PathBuf, CacheError> {
        Ok(self.root.join(sanitize(file_id)?))
    }
}

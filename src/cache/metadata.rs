//! Read-through cache that filters provider listings on the way out.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::artifact::ArtifactCache;
use super::error::CacheError;
use crate::legacy::LegacyTagsManager;

/// Wraps an [`ArtifactCache`] so provider listings read from it are passed
/// through the [`LegacyTagsManager`] first.
///
/// Files the manager has no interest in, and anything that is not a JSON
/// object, are returned untouched. A listing the filter leaves unchanged is
/// returned as the original bytes rather than a re-serialization.
#[derive(Debug)]
pub struct MetadataCache<C> {
    inner: C,
    tags: Arc<LegacyTagsManager>,
}

impl<C: ArtifactCache> MetadataCache<C> {
    /// Wraps `inner`, filtering with `tags`.
    pub fn new(inner: C, tags: Arc<LegacyTagsManager>) -> Self {
        Self { inner, tags }
    }

    /// The wrapped cache.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// The filter applied on reads.
    pub fn tags(&self) -> &Arc<LegacyTagsManager> {
        &self.tags
    }

    /// Filters `raw` when `file_id` is a listing the manager cares about.
    pub fn filter_for(&self, file_id: &str, raw: Vec<u8>) -> Vec<u8> {
        if !self.tags.has_provider(file_id) {
            return raw;
        }
        filter_listing_bytes(&self.tags, raw)
    }
}

impl<C: ArtifactCache> ArtifactCache for MetadataCache<C> {
    fn read(&self, file_id: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self
            .inner
            .read(file_id)?
            .map(|raw| self.filter_for(file_id, raw)))
    }

    /// Verifies the raw bytes, then filters them.
    fn read_verified(&self, file_id: &str, sha256: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self
            .inner
            .read_verified(file_id, sha256)?
            .map(|raw| self.filter_for(file_id, raw)))
    }

    fn write(&self, file_id: &str, contents: &[u8]) -> Result<(), CacheError> {
        self.inner.write(file_id, contents)
    }

    fn path_for(&self, file_id: &str) -> Result<std::path::PathBuf, CacheError> {
        self.inner.path_for(file_id)
    }

    fn cache_key(&self, package: &str, processed_url: &str, dist_type: &str) -> String {
        self.inner.cache_key(package, processed_url, dist_type)
    }

    fn write_if_changed(&self, file_id: &str, contents: &[u8]) -> Result<bool, CacheError> {
        // compare against the unfiltered file
        self.inner.write_if_changed(file_id, contents)
    }
}

/// Filters a JSON listing held as bytes; non-JSON input passes through.
pub fn filter_listing_bytes(tags: &LegacyTagsManager, raw: Vec<u8>) -> Vec<u8> {
    let Ok(mut listing) = serde_json::from_slice::<Value>(&raw) else {
        return raw;
    };
    if !listing.is_object() || !tags.apply(&mut listing) {
        return raw;
    }
    match serde_json::to_vec(&listing) {
        Ok(filtered) => filtered,
        Err(error) => {
            warn!(error = %error, "failed to re-encode filtered listing, keeping original");
            raw
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::{FileCache, sha256_hex};
    use serde_json::json;
    use tempfile::TempDir;

    fn listing_bytes() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "packages": {
                "symfony/symfony": {
                    "3.3.0": {"version_normalized": "3.3.0.0"},
                    "3.4.0": {"version_normalized": "3.4.0.0"}
                }
            }
        }))
        .unwrap()
    }

    fn setup() -> (TempDir, MetadataCache<FileCache>) {
        let dir = TempDir::new().unwrap();
        let tags = Arc::new(LegacyTagsManager::new());
        tags.add_constraint("symfony/symfony", "~3.4").unwrap();
        let cache = MetadataCache::new(FileCache::new(dir.path()), tags);
        (dir, cache)
    }

    #[test]
    fn test_read_filters_provider_files() {
        let (_dir, cache) = setup();
        cache.write("provider-symfony$symfony.json", &listing_bytes()).unwrap();

        let read = cache.read("provider-symfony$symfony.json").unwrap().unwrap();
        let value: Value = serde_json::from_slice(&read).unwrap();
        assert!(value["packages"]["symfony/symfony"].get("3.3.0").is_none());
        assert!(value["packages"]["symfony/symfony"].get("3.4.0").is_some());

        // the file on disk keeps every version
        let raw = cache.inner().read("provider-symfony$symfony.json").unwrap().unwrap();
        assert_eq!(raw, listing_bytes());
    }

    #[test]
    fn test_read_passes_through_unrelated_and_non_json_files() {
        let (_dir, cache) = setup();
        cache.write("provider-codeigniter$framework.json", &listing_bytes()).unwrap();
        cache.write("provider-symfony$console.json", b"not json at all").unwrap();

        assert_eq!(
            cache.read("provider-codeigniter$framework.json").unwrap().unwrap(),
            listing_bytes()
        );
        assert_eq!(
            cache.read("provider-symfony$console.json").unwrap().unwrap(),
            b"not json at all"
        );
    }

    #[test]
    fn test_unchanged_listing_returns_original_bytes() {
        let (_dir, cache) = setup();
        // pretty-printed input would not survive a re-serialization byte for byte
        let pretty = b"{\n  \"packages\": {\"symfony/symfony\": {\"3.4.0\": {}}}\n}".to_vec();
        cache.write("provider-symfony$symfony.json", &pretty).unwrap();
        assert_eq!(cache.read("provider-symfony$symfony.json").unwrap().unwrap(), pretty);
    }

    #[test]
    fn test_read_verified_checks_raw_bytes() {
        let (_dir, cache) = setup();
        let raw = listing_bytes();
        cache.write("provider-symfony$symfony.json", &raw).unwrap();

        let good = cache
            .read_verified("provider-symfony$symfony.json", &sha256_hex(&raw))
            .unwrap();
        assert!(good.is_some());
        assert_ne!(good.unwrap(), raw, "verified read is still filtered");

        let bad = cache
            .read_verified("provider-symfony$symfony.json", &sha256_hex(b"other"))
            .unwrap();
        assert!(bad.is_none());
        assert!(cache.read_verified("missing.json", "00").unwrap().is_none());
    }
}

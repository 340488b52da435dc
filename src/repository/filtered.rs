//! Repository adapter that filters fetched listings through the legacy-tags rules.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::composer::{ComposerRepository, MetadataSource, ProviderLister};
use super::error::RepositoryError;
use crate::download::RemoteFetch;
use crate::legacy::LegacyTagsManager;

/// Wraps a [`MetadataSource`] so live fetches get the same filtering a
/// [`MetadataCache`](crate::cache::MetadataCache) applies to cache hits.
#[derive(Debug)]
pub struct FilteredRepository<S> {
    inner: S,
    tags: Arc<LegacyTagsManager>,
}

impl<S> FilteredRepository<S> {
    /// Wraps `inner`, filtering with `tags`.
    pub fn new(inner: S, tags: Arc<LegacyTagsManager>) -> Self {
        Self { inner, tags }
    }

    /// The wrapped source.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl FilteredRepository<ComposerRepository> {
    /// Fetches the filtered listing of `name`; `Ok(None)` when the repository
    /// does not know the package.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the listing or the indexes leading to
    /// it cannot be loaded.
    pub async fn provider_listing(
        &self,
        fetch: &dyn RemoteFetch,
        name: &str,
    ) -> Result<Option<Value>, RepositoryError> {
        let Some(location) = self.inner.provider_location(fetch, name).await? else {
            return Ok(None);
        };
        self.fetch_file(
            fetch,
            &location.url,
            Some(&location.cache_key),
            location.sha256.as_deref(),
            true,
        )
        .await
        .map(Some)
    }
}

#[async_trait]
impl<S: MetadataSource> MetadataSource for FilteredRepository<S> {
    async fn fetch_file(
        &self,
        fetch: &dyn RemoteFetch,
        url: &str,
        cache_key: Option<&str>,
        checksum: Option<&str>,
        keep_mtime: bool,
    ) -> Result<Value, RepositoryError> {
        let mut value = self
            .inner
            .fetch_file(fetch, url, cache_key, checksum, keep_mtime)
            .await?;
        if self.tags.apply(&mut value) {
            debug!(url, "filtered legacy tags from fetched metadata");
        }
        Ok(value)
    }
}

#[async_trait]
impl<S: ProviderLister> ProviderLister for FilteredRepository<S> {
    async fn provider_names(&self, fetch: &dyn RemoteFetch) -> Result<Vec<String>, RepositoryError> {
        self.inner.provider_names(fetch).await
    }
}

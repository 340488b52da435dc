//! Composer-style repository metadata.
//!
//! A repository publishes a root `packages.json`. Older layouts list
//! `provider-includes` (files of `{"providers": {name: {"sha256": ..}}}`,
//! addressed by `%hash%`) and a `providers-url` template for per-package
//! listings; newer ones only publish a `metadata-url` template. Every file
//! is fetched through a [`RemoteFetch`] so the same code runs inside a
//! scheduler batch and outside of one.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};
use url::Url;

use super::descriptor::RepositoryDescriptor;
use super::error::RepositoryError;
use crate::cache::{ArtifactCache, sha256_hex};
use crate::download::{FetchOptions, RemoteFetch, host_of};

/// Cache identifier of the root metadata file.
const ROOT_CACHE_KEY: &str = "packages.json";

/// Fetches and decodes repository metadata files.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetches `url` and decodes it as JSON.
    ///
    /// With a `cache_key` and a `checksum`, a verified cached copy is used
    /// instead of the network. Fetched files are written to the cache under
    /// `cache_key`; `keep_mtime` skips rewriting identical content.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] for transport failures without a cached
    /// fallback, checksum mismatches and undecodable content.
    async fn fetch_file(
        &self,
        fetch: &dyn RemoteFetch,
        url: &str,
        cache_key: Option<&str>,
        checksum: Option<&str>,
        keep_mtime: bool,
    ) -> Result<Value, RepositoryError>;
}

/// Lists the packages a repository provides.
#[async_trait]
pub trait ProviderLister: Send + Sync {
    /// Names of every package with a provider listing, sorted.
    ///
    /// Loading the names warms the root metadata and the provider indexes.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the root metadata or an index cannot
    /// be loaded.
    async fn provider_names(&self, fetch: &dyn RemoteFetch) -> Result<Vec<String>, RepositoryError>;
}

/// Where the listing of one package lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLocation {
    /// Absolute URL of the listing.
    pub url: String,
    /// Identifier of the listing in the artifact cache.
    pub cache_key: String,
    /// Advertised SHA-256, when the repository publishes one.
    pub sha256: Option<String>,
}

/// A `composer` repository backed by an [`ArtifactCache`].
pub struct ComposerRepository {
    descriptor: RepositoryDescriptor,
    base: Url,
    root_url: String,
    cache: Arc<dyn ArtifactCache>,
    root: OnceCell<Value>,
    providers: OnceCell<BTreeMap<String, String>>,
}

impl std::fmt::Debug for ComposerRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposerRepository")
            .field("url", &self.descriptor.url)
            .field("root_url", &self.root_url)
            .field("root_loaded", &self.root.initialized())
            .finish_non_exhaustive()
    }
}

impl ComposerRepository {
    /// Creates a repository for `descriptor`, caching metadata in `cache`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidUrl`] when the descriptor URL cannot
    /// be parsed.
    pub fn new(
        descriptor: RepositoryDescriptor,
        cache: Arc<dyn ArtifactCache>,
    ) -> Result<Self, RepositoryError> {
        let trimmed = descriptor.url.trim_end_matches('/');
        let (base, root_url) = if trimmed.ends_with(".json") {
            (Url::parse(trimmed), trimmed.to_string())
        } else {
            (
                Url::parse(&format!("{trimmed}/")),
                format!("{trimmed}/{ROOT_CACHE_KEY}"),
            )
        };
        let base = base.map_err(|_| RepositoryError::invalid_url(&descriptor.url))?;
        Ok(Self {
            descriptor,
            base,
            root_url,
            cache,
            root: OnceCell::new(),
            providers: OnceCell::new(),
        })
    }

    /// The descriptor this repository was built from.
    #[must_use]
    pub fn descriptor(&self) -> &RepositoryDescriptor {
        &self.descriptor
    }

    /// URL of the root metadata file.
    #[must_use]
    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Loads the root metadata once per repository.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the root file cannot be fetched or decoded.
    pub async fn root(&self, fetch: &dyn RemoteFetch) -> Result<&Value, RepositoryError> {
        self.root
            .get_or_try_init(|| async {
                self.fetch_file(fetch, &self.root_url, Some(ROOT_CACHE_KEY), None, false)
                    .await
            })
            .await
    }

    /// Locates the listing of `name`, preferring hashed provider URLs.
    ///
    /// Returns `Ok(None)` when the repository does not know the package.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] when the root metadata or a provider index
    /// cannot be loaded.
    pub async fn provider_location(
        &self,
        fetch: &dyn RemoteFetch,
        name: &str,
    ) -> Result<Option<ProviderLocation>, RepositoryError> {
        let name = name.to_ascii_lowercase();
        let root = self.root(fetch).await?;

        if let Some(template) = root.get("providers-url").and_then(Value::as_str)
            && let Some(hash) = self.providers(fetch).await?.get(&name)
        {
            let url = self.resolve(&template.replace("%package%", &name).replace("%hash%", hash))?;
            return Ok(Some(ProviderLocation {
                url,
                cache_key: format!("provider-{}.json", name.replace('/', "$")),
                sha256: Some(hash.clone()),
            }));
        }

        if let Some(template) = root.get("metadata-url").and_then(Value::as_str) {
            let url = self.resolve(&template.replace("%package%", &name))?;
            return Ok(Some(ProviderLocation {
                url,
                cache_key: format!("provider-{}.json", name.replace('/', "~")),
                sha256: None,
            }));
        }

        Ok(None)
    }

    /// Provider name to listing hash, merged from the root and every include.
    async fn providers(
        &self,
        fetch: &dyn RemoteFetch,
    ) -> Result<&BTreeMap<String, String>, RepositoryError> {
        self.providers
            .get_or_try_init(|| async {
                let root = self.root(fetch).await?;
                let mut providers = BTreeMap::new();
                collect_providers(root, &mut providers);

                if let Some(includes) = root.get("provider-includes").and_then(Value::as_object) {
                    for (template, meta) in includes {
                        let Some(hash) = meta.get("sha256").and_then(Value::as_str) else {
                            debug!(include = %template, "provider include without sha256, skipping");
                            continue;
                        };
                        let url = self.resolve(&template.replace("%hash%", hash))?;
                        let cache_key = template.replace("%hash%", "").replace('$', "");
                        let include = self
                            .fetch_file(fetch, &url, Some(&cache_key), Some(hash), true)
                            .await?;
                        collect_providers(&include, &mut providers);
                    }
                }

                debug!(
                    repository = %self.descriptor.url,
                    providers = providers.len(),
                    "provider index loaded"
                );
                Ok(providers)
            })
            .await
    }

    fn resolve(&self, path: &str) -> Result<String, RepositoryError> {
        self.base
            .join(path)
            .map(String::from)
            .map_err(|_| RepositoryError::invalid_url(path))
    }

    fn store(&self, cache_key: &str, bytes: &[u8], keep_mtime: bool) {
        let outcome = if keep_mtime {
            self.cache.write_if_changed(cache_key, bytes).map(|_| ())
        } else {
            self.cache.write(cache_key, bytes)
        };
        if let Err(error) = outcome {
            warn!(cache_key, error = %error, "failed to write metadata to cache");
        }
    }
}

fn collect_providers(document: &Value, providers: &mut BTreeMap<String, String>) {
    let Some(entries) = document.get("providers").and_then(Value::as_object) else {
        return;
    };
    for (name, meta) in entries {
        if let Some(hash) = meta.get("sha256").and_then(Value::as_str) {
            providers.insert(name.to_ascii_lowercase(), hash.to_string());
        }
    }
}

fn decode(url: &str, bytes: &[u8]) -> Result<Value, RepositoryError> {
    serde_json::from_slice(bytes).map_err(|e| RepositoryError::invalid_json(url, e))
}

#[async_trait]
impl MetadataSource for ComposerRepository {
    #[instrument(skip(self, fetch), fields(repository = %self.descriptor.url))]
    async fn fetch_file(
        &self,
        fetch: &dyn RemoteFetch,
        url: &str,
        cache_key: Option<&str>,
        checksum: Option<&str>,
        keep_mtime: bool,
    ) -> Result<Value, RepositoryError> {
        if let (Some(key), Some(sha256)) = (cache_key, checksum)
            && let Some(cached) = self.cache.read_verified(key, sha256)?
        {
            debug!(url, cache_key = key, "metadata served from cache");
            return decode(url, &cached);
        }

        let host = host_of(url).unwrap_or_default();
        let bytes = match fetch.fetch(&host, url, FetchOptions::in_memory()).await {
            Ok(output) => output.as_bytes().map(<[u8]>::to_vec).unwrap_or_default(),
            Err(error) => {
                // Unversioned files may be served stale; hashed ones may not.
                if checksum.is_none()
                    && let Some(key) = cache_key
                    && let Some(cached) = self.cache.read(key)?
                {
                    warn!(url, error = %error, "fetch failed, falling back to cached copy");
                    return decode(url, &cached);
                }
                return Err(RepositoryError::download(url, error));
            }
        };

        if let Some(expected) = checksum {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(RepositoryError::checksum_mismatch(url, expected, actual));
            }
        }

        let value = decode(url, &bytes)?;
        if let Some(key) = cache_key {
            self.store(key, &bytes, keep_mtime);
        }
        Ok(value)
    }
}

#[async_trait]
impl ProviderLister for ComposerRepository {
    #[instrument(skip(self, fetch), fields(repository = %self.descriptor.url))]
    async fn provider_names(&self, fetch: &dyn RemoteFetch) -> Result<Vec<String>, RepositoryError> {
        Ok(self.providers(fetch).await?.keys().cloned().collect())
    }
}

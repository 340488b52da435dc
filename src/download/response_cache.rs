//! In-memory response cache shared by the scheduler and repository adapters.
//!
//! Entries are only ever added: a listing fetched once in a run is assumed
//! not to change for the rest of it, so the first stored body wins.

use std::sync::Arc;

use dashmap::DashMap;

/// `url → body` cache, cheap to clone (all clones share one map).
#[derive(Debug, Clone, Default)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, Arc<[u8]>>>,
}

impl ResponseCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached body for `url`.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<Arc<[u8]>> {
        self.entries.get(url).map(|entry| Arc::clone(entry.value()))
    }

    /// Stores `body` for `url` unless an entry already exists.
    ///
    /// Returns `true` when the body was stored.
    pub fn insert(&self, url: impl Into<String>, body: &[u8]) -> bool {
        let mut inserted = false;
        self.entries.entry(url.into()).or_insert_with(|| {
            inserted = true;
            Arc::from(body)
        });
        inserted
    }

    /// Returns `true` when `url` has a cached body.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    /// Number of cached responses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
